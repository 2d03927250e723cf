// Copyright 2024 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The server orchestrator.
//!
//! A [`Server`] collects the application's rules, middleware, hooks,
//! and exception handlers while it is being configured. Starting it
//! (or asking for its [`Engine`]) freezes the configuration: the rule
//! tree and both middleware stacks are composed into immutable chains,
//! and any further registration fails with
//! [`ConfigurationError::Frozen`].
//!
//! The [`Engine`] is the message-processing core, abstracted from any
//! underlying network I/O: bytes in, routed through the raw stack, the
//! decoded query stack, and the rule tree, reply bytes out. The
//! transports feed it; tests can call it directly.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, OnceLock};

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use log::{debug, info, warn};
use tokio::sync::Semaphore;

use crate::codec;
use crate::error::{ConfigurationError, ErrorClass, RequestError};
use crate::middleware::{
    compose_raw_chain, dispatch_registered_raw, QueryMiddleware, RawChain, RawFaultHandler,
    RawFaultMiddleware, RawMiddleware, Resolution,
};
use crate::query::{Qtypes, Query};
use crate::response::{Answer, Response};
use crate::rules::{Matcher, Rule};
use crate::scaffold::Scaffold;
use crate::settings::{Settings, Transport};
use crate::suffix::{self, SuffixResolver};
use crate::transport::{shutdown_channels, TcpTransport, UdpTransport};

////////////////////////////////////////////////////////////////////////
// SERVER PUBLIC API                                                  //
////////////////////////////////////////////////////////////////////////

/// A programmable DNS name server.
///
/// Register handlers against name patterns and query types, then call
/// [`Server::run`] to serve them over the configured transport until
/// the process is interrupted.
pub struct Server {
    name: String,
    settings: Settings,
    root: Arc<Scaffold>,
    raw: Mutex<RawConfig>,
    resolver: Mutex<Arc<dyn SuffixResolver>>,
    engine: OnceLock<Arc<Engine>>,
}

#[derive(Default)]
struct RawConfig {
    middlewares: Vec<Arc<dyn RawMiddleware>>,
    fault_handlers: HashMap<ErrorClass, RawFaultHandler>,
}

impl Server {
    /// Creates a new `Server` with default [`Settings`]. The name is
    /// used for logging.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root: Scaffold::new(name.clone()),
            name,
            settings: Settings::default(),
            raw: Mutex::new(RawConfig::default()),
            resolver: Mutex::new(suffix::default_resolver()),
            engine: OnceLock::new(),
        }
    }

    /// Returns the name of this `Server`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the settings for modification. Settings changed after
    /// the server has started have no effect.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Replaces the public-suffix resolver used by `{base_domain}`
    /// patterns.
    pub fn set_suffix_resolver(
        &self,
        resolver: Arc<dyn SuffixResolver>,
    ) -> Result<(), ConfigurationError> {
        if self.engine.get().is_some() {
            return Err(ConfigurationError::Frozen);
        }
        *self.resolver.lock().expect("server lock poisoned") = resolver;
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////
    // REGISTRATION                                                   //
    ////////////////////////////////////////////////////////////////////

    /// Registers a handler under a pattern string, interpreting the
    /// pattern with [`Matcher::smart`] and the case-sensitivity
    /// default from the settings.
    pub fn rule<F, A>(
        &self,
        pattern: &str,
        qtypes: &[&str],
        handler: F,
    ) -> Result<(), ConfigurationError>
    where
        F: Fn(&Query) -> Result<A, RequestError> + Send + Sync + 'static,
        A: Into<Answer>,
    {
        let matcher = Matcher::smart(pattern, self.settings.case_sensitive_default)?;
        self.root
            .register_rule(Rule::new(matcher, Qtypes::parse(qtypes)?, handler))
    }

    /// Registers an already-built rule.
    pub fn register_rule(&self, rule: Rule) -> Result<(), ConfigurationError> {
        self.root.register_rule(rule)
    }

    /// Registers a nested scaffold probed for every query.
    pub fn register_scaffold(&self, child: &Arc<Scaffold>) -> Result<(), ConfigurationError> {
        self.root.register_scaffold(child)
    }

    /// Mounts a nested scaffold under an outer matcher and type-set.
    pub fn mount(
        &self,
        matcher: Matcher,
        qtypes: Qtypes,
        child: &Arc<Scaffold>,
    ) -> Result<(), ConfigurationError> {
        self.root.mount(matcher, qtypes, child)
    }

    /// Appends a middleware to the query stack.
    pub fn register_middleware(
        &self,
        middleware: Arc<dyn QueryMiddleware>,
    ) -> Result<(), ConfigurationError> {
        self.root.register_middleware(middleware)
    }

    /// Appends a middleware to the raw-record stack.
    pub fn register_raw_middleware(
        &self,
        middleware: Arc<dyn RawMiddleware>,
    ) -> Result<(), ConfigurationError> {
        let mut raw = self.lock_raw()?;
        raw.middlewares.push(middleware);
        Ok(())
    }

    /// Registers a query-stack exception handler for an error class.
    pub fn exception_handler<F>(
        &self,
        class: ErrorClass,
        handler: F,
    ) -> Result<(), ConfigurationError>
    where
        F: Fn(&Query, &RequestError) -> Result<Response, RequestError> + Send + Sync + 'static,
    {
        self.root.exception_handler(class, handler)
    }

    /// Registers a raw-stack exception handler for an error class.
    /// Raw handlers also opt requests of that class out of the default
    /// cancellation behavior of dropping the reply.
    pub fn raw_exception_handler<F>(
        &self,
        class: ErrorClass,
        handler: F,
    ) -> Result<(), ConfigurationError>
    where
        F: Fn(&Message, &RequestError) -> Result<Message, RequestError> + Send + Sync + 'static,
    {
        let mut raw = self.lock_raw()?;
        if raw.fault_handlers.contains_key(&class) {
            return Err(ConfigurationError::DuplicateExceptionHandler(class));
        }
        raw.fault_handlers.insert(class, Arc::new(handler));
        Ok(())
    }

    /// Registers a hook to run once, at the first query.
    pub fn before_first_query<F>(&self, hook: F) -> Result<(), ConfigurationError>
    where
        F: Fn() -> Result<(), RequestError> + Send + Sync + 'static,
    {
        self.root.before_first_query(hook)
    }

    /// Registers a hook to run before each query is dispatched.
    pub fn before_query<F>(&self, hook: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&Query) -> Result<Option<Answer>, RequestError> + Send + Sync + 'static,
    {
        self.root.before_query(hook)
    }

    /// Registers a hook to run on each response.
    pub fn after_query<F>(&self, hook: F) -> Result<(), ConfigurationError>
    where
        F: Fn(Response) -> Result<Response, RequestError> + Send + Sync + 'static,
    {
        self.root.after_query(hook)
    }

    fn lock_raw(&self) -> Result<std::sync::MutexGuard<RawConfig>, ConfigurationError> {
        if self.engine.get().is_some() {
            return Err(ConfigurationError::Frozen);
        }
        Ok(self.raw.lock().expect("server lock poisoned"))
    }

    ////////////////////////////////////////////////////////////////////
    // FREEZING AND SERVING                                           //
    ////////////////////////////////////////////////////////////////////

    /// Freezes the configuration and returns the message-processing
    /// engine. The first call composes the chains; later calls return
    /// the same engine.
    pub fn engine(&self) -> Arc<Engine> {
        self.engine.get_or_init(|| self.compose_engine()).clone()
    }

    fn compose_engine(&self) -> Arc<Engine> {
        let resolver = self
            .resolver
            .lock()
            .expect("server lock poisoned")
            .clone();
        let query_chain = self.root.freeze(true, &resolver);

        let raw = self.raw.lock().expect("server lock poisoned");
        let fault_handlers = Arc::new(raw.fault_handlers.clone());

        // The sink of the raw stack: build the reply skeleton, weed
        // out what the rule tree should never see, and adapt between
        // the wire record and the decoded query.
        let adapter: RawChain = Arc::new(move |record: &Message| {
            let mut reply = codec::reply_skeleton(record);
            if record.op_code() != OpCode::Query {
                debug!("received non-query opcode {:?}", record.op_code());
                reply.set_response_code(ResponseCode::NotImp);
                return Ok(reply);
            }
            if record.queries().len() != 1 {
                // Refusing multi-question messages is common practice
                // among servers; it keeps handler semantics simple.
                debug!(
                    "received a message with {} questions; refusing",
                    record.queries().len(),
                );
                reply.set_response_code(ResponseCode::Refused);
                return Ok(reply);
            }
            // A question the codec rejects surfaces as a Decode error,
            // which the raw exception middleware answers (FORMERR by
            // default).
            let query = codec::question_to_query(record)?;
            let response = match query_chain(&query)? {
                Resolution::Answered(response) => response,
                Resolution::Unmatched => Response::with_code(ResponseCode::NXDomain),
            };
            codec::apply_response(&mut reply, response);
            Ok(reply)
        });

        let mut stack: Vec<Arc<dyn RawMiddleware>> = Vec::new();
        stack.push(Arc::new(RawFaultMiddleware::new(fault_handlers.clone())));
        stack.extend(raw.middlewares.iter().cloned());
        let raw_chain = compose_raw_chain(stack, adapter);

        Arc::new(Engine {
            raw_chain,
            fault_handlers,
        })
    }

    /// Freezes the configuration, binds the configured transport, and
    /// serves until the process receives an interrupt. This builds its
    /// own Tokio runtime; use [`Server::serve`] from within an
    /// existing one.
    pub fn run(&self) -> io::Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.serve())
    }

    /// The async variant of [`Server::run`].
    pub async fn serve(&self) -> io::Result<()> {
        let engine = self.engine();
        let settings = self.settings.clone();
        info!("server {} starting", self.name);

        let addr = settings.bind_addr()?;
        let workers = Arc::new(Semaphore::new(settings.worker_count.max(1)));
        let (controller, handle) = shutdown_channels();
        match settings.transport {
            Transport::Udp => {
                let transport = UdpTransport::bind(addr, engine, workers, &settings).await?;
                tokio::spawn(transport.run(handle));
            }
            Transport::Tcp => {
                let transport = TcpTransport::bind(addr, engine, workers, &settings).await?;
                tokio::spawn(transport.run(handle));
            }
        }

        tokio::signal::ctrl_c().await?;
        info!("received interrupt; shutting down");
        controller.shut_down().await;
        info!("shutdown complete");
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// THE ENGINE                                                         //
////////////////////////////////////////////////////////////////////////

/// The frozen message-processing core of a [`Server`], independent of
/// any network I/O.
pub struct Engine {
    raw_chain: RawChain,
    fault_handlers: Arc<HashMap<ErrorClass, RawFaultHandler>>,
}

impl Engine {
    /// Handles one received DNS message and returns the reply to send,
    /// if any.
    ///
    /// Messages that cannot be parsed at all, and messages that are
    /// themselves responses, are ignored. Replies longer than
    /// `reply_limit` are truncated with the TC bit set.
    pub fn handle_message(&self, received: &[u8], reply_limit: usize) -> Option<Vec<u8>> {
        let record = match codec::parse(received) {
            Ok(record) => record,
            Err(error) => {
                debug!("ignoring message that failed to parse: {error}");
                return None;
            }
        };
        if record.message_type() != MessageType::Query {
            return None;
        }
        let reply = match (self.raw_chain)(&record) {
            Ok(reply) => reply,
            Err(error) => {
                // Only a failing raw exception handler lands here; the
                // reply is dropped rather than sent malformed.
                warn!("raw exception handler failed: {error}; dropping reply");
                return None;
            }
        };
        match codec::encode_with_limit(&reply, reply_limit) {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                warn!("failed to encode reply: {error}");
                None
            }
        }
    }

    /// Produces the reply for a request cancelled by its deadline, if
    /// a raw exception handler for [`ErrorClass::Cancelled`] (or an
    /// ancestor) is registered. With none registered the reply is
    /// dropped, which is the default cancellation behavior.
    pub(crate) fn cancelled_reply(&self, received: &[u8], reply_limit: usize) -> Option<Vec<u8>> {
        let record = codec::parse(received).ok()?;
        let error = RequestError::cancelled("request deadline passed");
        match dispatch_registered_raw(&self.fault_handlers, &record, &error)? {
            Ok(reply) => codec::encode_with_limit(&reply, reply_limit).ok(),
            Err(error) => {
                warn!("cancellation handler failed: {error}; dropping reply");
                None
            }
        }
    }
}
