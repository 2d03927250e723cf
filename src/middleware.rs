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

//! Middleware stacks for both the raw-record and the query layers.
//!
//! A middleware receives a value and a `next` callable; it may
//! short-circuit by not calling `next`, transform the value before the
//! call, or transform the result after it. Stacks are composed once,
//! when the server configuration is frozen, into a single callable
//! chain; the built-in exception-handler middleware always sits at the
//! head of each stack, so no error raised below it escapes as anything
//! but a well-formed response.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hickory_proto::op::{Message, ResponseCode};
use log::debug;

use crate::codec;
use crate::error::{ErrorClass, RequestError};
use crate::query::Query;
use crate::response::{Answer, Response};

////////////////////////////////////////////////////////////////////////
// QUERY MIDDLEWARE                                                   //
////////////////////////////////////////////////////////////////////////

/// The outcome of running a query through a container.
///
/// `Unmatched` lets a nested container report that none of its rules
/// applied, so the enclosing container can fall through to its next
/// rule. At the top of the tree, `Unmatched` becomes an `NXDomain`
/// reply.
#[derive(Clone, Debug)]
pub enum Resolution {
    /// A rule (or middleware, or hook) produced a response.
    Answered(Response),

    /// No rule matched the query.
    Unmatched,
}

/// Middleware over decoded [`Query`] values.
pub trait QueryMiddleware: Send + Sync {
    /// Processes `query`, calling `next` to continue down the stack.
    fn handle(&self, query: &Query, next: &dyn QueryNext)
        -> Result<Resolution, RequestError>;
}

/// The continuation passed to a [`QueryMiddleware`].
pub trait QueryNext {
    /// Invokes the remainder of the stack.
    fn call(&self, query: &Query) -> Result<Resolution, RequestError>;
}

/// A composed query stack: the callable produced at freeze time.
pub(crate) type QueryChain =
    Arc<dyn Fn(&Query) -> Result<Resolution, RequestError> + Send + Sync>;

struct QueryChainNext<'a>(&'a (dyn Fn(&Query) -> Result<Resolution, RequestError> + Send + Sync));

impl QueryNext for QueryChainNext<'_> {
    fn call(&self, query: &Query) -> Result<Resolution, RequestError> {
        (self.0)(query)
    }
}

/// Folds a middleware stack onto a sink, outermost middleware first.
pub(crate) fn compose_query_chain(
    middlewares: Vec<Arc<dyn QueryMiddleware>>,
    sink: QueryChain,
) -> QueryChain {
    let mut next = sink;
    for middleware in middlewares.into_iter().rev() {
        let inner = next;
        next = Arc::new(move |query: &Query| {
            middleware.handle(query, &QueryChainNext(inner.as_ref()))
        });
    }
    next
}

////////////////////////////////////////////////////////////////////////
// RAW MIDDLEWARE                                                     //
////////////////////////////////////////////////////////////////////////

/// Middleware over raw wire records, before any decoding into
/// [`Query`] values has happened.
pub trait RawMiddleware: Send + Sync {
    /// Processes `record`, calling `next` to continue down the stack.
    fn handle(&self, record: &Message, next: &dyn RawNext) -> Result<Message, RequestError>;
}

/// The continuation passed to a [`RawMiddleware`].
pub trait RawNext {
    /// Invokes the remainder of the stack.
    fn call(&self, record: &Message) -> Result<Message, RequestError>;
}

/// A composed raw stack.
pub(crate) type RawChain =
    Arc<dyn Fn(&Message) -> Result<Message, RequestError> + Send + Sync>;

struct RawChainNext<'a>(&'a (dyn Fn(&Message) -> Result<Message, RequestError> + Send + Sync));

impl RawNext for RawChainNext<'_> {
    fn call(&self, record: &Message) -> Result<Message, RequestError> {
        (self.0)(record)
    }
}

/// Folds a raw middleware stack onto a sink, outermost first.
pub(crate) fn compose_raw_chain(
    middlewares: Vec<Arc<dyn RawMiddleware>>,
    sink: RawChain,
) -> RawChain {
    let mut next = sink;
    for middleware in middlewares.into_iter().rev() {
        let inner = next;
        next = Arc::new(move |record: &Message| {
            middleware.handle(record, &RawChainNext(inner.as_ref()))
        });
    }
    next
}

////////////////////////////////////////////////////////////////////////
// EXCEPTION-HANDLER MIDDLEWARE                                       //
////////////////////////////////////////////////////////////////////////

/// An exception handler for the query stack. It receives the query
/// being served and the error raised below, and produces the response
/// to send instead. If the handler itself fails, the error propagates
/// to the raw stack.
pub type QueryFaultHandler =
    Arc<dyn Fn(&Query, &RequestError) -> Result<Response, RequestError> + Send + Sync>;

/// An exception handler for the raw stack. Raw handlers are the last
/// line of defense and are expected to be robust; if one fails, the
/// reply is dropped.
pub type RawFaultHandler =
    Arc<dyn Fn(&Message, &RequestError) -> Result<Message, RequestError> + Send + Sync>;

/// The built-in middleware at the head of every query stack. Catches
/// [`RequestError`]s from below and dispatches them to the handler
/// registered for the most specific class along the error's ancestry.
/// With no registered handler the default applies: an empty `ServFail`
/// response.
pub(crate) struct QueryFaultMiddleware {
    handlers: HashMap<ErrorClass, QueryFaultHandler>,
}

impl QueryFaultMiddleware {
    pub(crate) fn new(handlers: HashMap<ErrorClass, QueryFaultHandler>) -> Self {
        Self { handlers }
    }

    fn lookup(&self, class: ErrorClass) -> Option<&QueryFaultHandler> {
        class.ancestry().find_map(|c| self.handlers.get(&c))
    }
}

impl QueryMiddleware for QueryFaultMiddleware {
    fn handle(&self, query: &Query, next: &dyn QueryNext) -> Result<Resolution, RequestError> {
        match next.call(query) {
            Ok(resolution) => Ok(resolution),
            Err(error) => match self.lookup(error.class()) {
                Some(handler) => {
                    debug!("dispatching {error} to its exception handler");
                    handler(query, &error).map(Resolution::Answered)
                }
                None => {
                    debug!("no exception handler for {error}; answering SERVFAIL");
                    Ok(Resolution::Answered(Response::with_code(
                        ResponseCode::ServFail,
                    )))
                }
            },
        }
    }
}

/// The built-in middleware at the head of the raw stack. Works like
/// [`QueryFaultMiddleware`], but its default builds a reply from the
/// request record: `FormErr` for decode failures, `ServFail` for
/// everything else.
pub(crate) struct RawFaultMiddleware {
    handlers: Arc<HashMap<ErrorClass, RawFaultHandler>>,
}

impl RawFaultMiddleware {
    pub(crate) fn new(handlers: Arc<HashMap<ErrorClass, RawFaultHandler>>) -> Self {
        Self { handlers }
    }

    fn lookup(&self, class: ErrorClass) -> Option<&RawFaultHandler> {
        class.ancestry().find_map(|c| self.handlers.get(&c))
    }
}

impl RawMiddleware for RawFaultMiddleware {
    fn handle(&self, record: &Message, next: &dyn RawNext) -> Result<Message, RequestError> {
        match next.call(record) {
            Ok(reply) => Ok(reply),
            Err(error) => match self.lookup(error.class()) {
                Some(handler) => {
                    debug!("dispatching {error} to its raw exception handler");
                    handler(record, &error)
                }
                None => {
                    let code = if error.class() == ErrorClass::Decode {
                        ResponseCode::FormErr
                    } else {
                        ResponseCode::ServFail
                    };
                    debug!("no raw exception handler for {error}; answering {code:?}");
                    let mut reply = codec::reply_skeleton(record);
                    reply.set_response_code(code);
                    Ok(reply)
                }
            },
        }
    }
}

/// Dispatches an error against a handler map without applying any
/// default. Used for cancellations, where the default behavior is to
/// drop the reply rather than to answer.
pub(crate) fn dispatch_registered_raw(
    handlers: &HashMap<ErrorClass, RawFaultHandler>,
    record: &Message,
    error: &RequestError,
) -> Option<Result<Message, RequestError>> {
    let handler = error.class().ancestry().find_map(|c| handlers.get(&c))?;
    Some(handler(record, error))
}

////////////////////////////////////////////////////////////////////////
// HOOK MIDDLEWARE                                                    //
////////////////////////////////////////////////////////////////////////

/// A hook run once, at the first query a container serves.
pub type BeforeFirstHook = Arc<dyn Fn() -> Result<(), RequestError> + Send + Sync>;

/// A hook run before each query reaches rule dispatch. Returning an
/// [`Answer`] skips dispatch and continues with result processing.
pub type BeforeHook =
    Arc<dyn Fn(&Query) -> Result<Option<Answer>, RequestError> + Send + Sync>;

/// A hook run on each produced response; it may replace the response.
pub type AfterHook = Arc<dyn Fn(Response) -> Result<Response, RequestError> + Send + Sync>;

#[derive(Default)]
struct FirstQueryState {
    run: bool,
}

/// The built-in middleware just above rule dispatch that runs
/// registered hooks.
///
/// `before_first` hooks run at most once, when the first query
/// arrives; if one fails, the failure is recorded and the remaining
/// hooks are skipped, but later queries proceed regardless.
/// `before` hooks run per query and may short-circuit dispatch by
/// returning an answer. `after` hooks transform every response the
/// container produces; they do not run when the container reported no
/// match.
pub(crate) struct HookMiddleware {
    before_first: Vec<BeforeFirstHook>,
    before: Vec<BeforeHook>,
    after: Vec<AfterHook>,
    first_query: Mutex<FirstQueryState>,
}

impl HookMiddleware {
    pub(crate) fn new(
        before_first: Vec<BeforeFirstHook>,
        before: Vec<BeforeHook>,
        after: Vec<AfterHook>,
    ) -> Self {
        Self {
            before_first,
            before,
            after,
            first_query: Mutex::new(FirstQueryState::default()),
        }
    }

    fn run_before_first(&self) -> Result<(), RequestError> {
        let mut state = self.first_query.lock().expect("first-query lock poisoned");
        if state.run {
            return Ok(());
        }
        state.run = true;
        for hook in &self.before_first {
            if let Err(error) = hook() {
                // The latch stays set: the remaining hooks are skipped
                // and later queries proceed without retrying.
                debug!("a first-query hook failed: {error}");
                return Err(error);
            }
        }
        Ok(())
    }
}

impl QueryMiddleware for HookMiddleware {
    fn handle(&self, query: &Query, next: &dyn QueryNext) -> Result<Resolution, RequestError> {
        self.run_before_first()?;

        let mut resolution = None;
        for hook in &self.before {
            if let Some(answer) = hook(query)? {
                debug!("a before-query hook answered {query}");
                resolution = Some(Resolution::Answered(answer.into_response()));
                break;
            }
        }
        let resolution = match resolution {
            Some(resolution) => resolution,
            None => next.call(query)?,
        };

        match resolution {
            Resolution::Answered(mut response) => {
                for hook in &self.after {
                    response = hook(response)?;
                }
                Ok(Resolution::Answered(response))
            }
            Resolution::Unmatched => Ok(Resolution::Unmatched),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use hickory_proto::rr::RecordType;

    use super::*;

    fn query() -> Query {
        Query::new("example.com".parse().unwrap(), RecordType::A)
    }

    /// A middleware that records its position on the way in and out.
    struct Recorder {
        id: u8,
        trace: Arc<Mutex<Vec<(u8, &'static str)>>>,
    }

    impl QueryMiddleware for Recorder {
        fn handle(
            &self,
            query: &Query,
            next: &dyn QueryNext,
        ) -> Result<Resolution, RequestError> {
            self.trace.lock().unwrap().push((self.id, "enter"));
            let result = next.call(query);
            self.trace.lock().unwrap().push((self.id, "leave"));
            result
        }
    }

    fn answered_sink() -> QueryChain {
        Arc::new(|_| Ok(Resolution::Answered(Response::new())))
    }

    #[test]
    fn middlewares_run_in_registration_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let stack: Vec<Arc<dyn QueryMiddleware>> = vec![
            Arc::new(Recorder {
                id: 1,
                trace: trace.clone(),
            }),
            Arc::new(Recorder {
                id: 2,
                trace: trace.clone(),
            }),
            Arc::new(Recorder {
                id: 3,
                trace: trace.clone(),
            }),
        ];
        let chain = compose_query_chain(stack, answered_sink());
        chain(&query()).unwrap();
        assert_eq!(
            *trace.lock().unwrap(),
            vec![
                (1, "enter"),
                (2, "enter"),
                (3, "enter"),
                (3, "leave"),
                (2, "leave"),
                (1, "leave"),
            ],
        );
    }

    /// A middleware that answers without calling `next`.
    struct ShortCircuit;

    impl QueryMiddleware for ShortCircuit {
        fn handle(&self, _: &Query, _: &dyn QueryNext) -> Result<Resolution, RequestError> {
            Ok(Resolution::Answered(Response::with_code(
                ResponseCode::Refused,
            )))
        }
    }

    #[test]
    fn middlewares_may_short_circuit() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let stack: Vec<Arc<dyn QueryMiddleware>> = vec![
            Arc::new(ShortCircuit),
            Arc::new(Recorder {
                id: 1,
                trace: trace.clone(),
            }),
        ];
        let chain = compose_query_chain(stack, answered_sink());
        let resolution = chain(&query()).unwrap();
        assert!(matches!(
            resolution,
            Resolution::Answered(Response {
                code: ResponseCode::Refused,
                ..
            }),
        ));
        assert!(trace.lock().unwrap().is_empty());
    }

    fn failing_sink(class: ErrorClass) -> QueryChain {
        Arc::new(move |_| Err(RequestError::new(class, "boom")))
    }

    #[test]
    fn unhandled_errors_become_servfail() {
        let middleware = QueryFaultMiddleware::new(HashMap::new());
        let chain = compose_query_chain(
            vec![Arc::new(middleware)],
            failing_sink(ErrorClass::Handler),
        );
        match chain(&query()).unwrap() {
            Resolution::Answered(response) => {
                assert_eq!(response.code, ResponseCode::ServFail);
            }
            Resolution::Unmatched => panic!("expected an answer"),
        }
    }

    #[test]
    fn the_most_specific_handler_wins() {
        let mut handlers: HashMap<ErrorClass, QueryFaultHandler> = HashMap::new();
        handlers.insert(
            ErrorClass::Any,
            Arc::new(|_, _| Ok(Response::with_code(ResponseCode::ServFail))),
        );
        handlers.insert(
            ErrorClass::NotImplemented,
            Arc::new(|_, _| Ok(Response::with_code(ResponseCode::NotImp))),
        );
        let middleware = Arc::new(QueryFaultMiddleware::new(handlers));

        let chain = compose_query_chain(
            vec![middleware.clone()],
            failing_sink(ErrorClass::NotImplemented),
        );
        match chain(&query()).unwrap() {
            Resolution::Answered(response) => assert_eq!(response.code, ResponseCode::NotImp),
            Resolution::Unmatched => panic!("expected an answer"),
        }

        // A Handler-class error skips the NotImplemented handler and
        // lands on the root handler.
        let chain =
            compose_query_chain(vec![middleware], failing_sink(ErrorClass::Handler));
        match chain(&query()).unwrap() {
            Resolution::Answered(response) => assert_eq!(response.code, ResponseCode::ServFail),
            Resolution::Unmatched => panic!("expected an answer"),
        }
    }

    #[test]
    fn a_failing_exception_handler_propagates() {
        let mut handlers: HashMap<ErrorClass, QueryFaultHandler> = HashMap::new();
        handlers.insert(
            ErrorClass::Custom("Broken"),
            Arc::new(|_, _| Err(RequestError::handler("handler is broken too"))),
        );
        let chain = compose_query_chain(
            vec![Arc::new(QueryFaultMiddleware::new(handlers))],
            failing_sink(ErrorClass::Custom("Broken")),
        );
        assert!(chain(&query()).is_err());
    }

    fn request() -> Message {
        let mut message = Message::new();
        message.set_id(0x77);
        message
    }

    #[test]
    fn raw_decode_errors_default_to_formerr() {
        let middleware = RawFaultMiddleware::new(Arc::new(HashMap::new()));
        let sink: RawChain = Arc::new(|_| Err(RequestError::decode("bad record")));
        let chain = compose_raw_chain(vec![Arc::new(middleware)], sink);
        let reply = chain(&request()).unwrap();
        assert_eq!(reply.response_code(), ResponseCode::FormErr);
        assert_eq!(reply.id(), 0x77);
    }

    #[test]
    fn raw_handler_errors_default_to_servfail() {
        let middleware = RawFaultMiddleware::new(Arc::new(HashMap::new()));
        let sink: RawChain = Arc::new(|_| Err(RequestError::handler("boom")));
        let chain = compose_raw_chain(vec![Arc::new(middleware)], sink);
        let reply = chain(&request()).unwrap();
        assert_eq!(reply.response_code(), ResponseCode::ServFail);
    }

    #[test]
    fn registered_raw_dispatch_applies_no_default() {
        let handlers = HashMap::new();
        let error = RequestError::cancelled("deadline passed");
        assert!(dispatch_registered_raw(&handlers, &request(), &error).is_none());

        let mut handlers: HashMap<ErrorClass, RawFaultHandler> = HashMap::new();
        handlers.insert(
            ErrorClass::Cancelled,
            Arc::new(|record: &Message, _e: &RequestError| {
                let mut reply = codec::reply_skeleton(record);
                reply.set_response_code(ResponseCode::ServFail);
                Ok(reply)
            }),
        );
        let dispatched = dispatch_registered_raw(&handlers, &request(), &error)
            .expect("a registered handler should dispatch")
            .unwrap();
        assert_eq!(dispatched.response_code(), ResponseCode::ServFail);
    }

    #[test]
    fn before_first_hooks_run_once_even_after_failure() {
        let first_calls = Arc::new(Mutex::new(0));
        let calls = first_calls.clone();
        let hooks = HookMiddleware::new(
            vec![Arc::new(move || {
                *calls.lock().unwrap() += 1;
                Err(RequestError::handler("first-query hook failed"))
            })],
            Vec::new(),
            Vec::new(),
        );
        let chain = compose_query_chain(vec![Arc::new(hooks)], answered_sink());

        assert!(chain(&query()).is_err());
        assert!(chain(&query()).is_ok());
        assert_eq!(*first_calls.lock().unwrap(), 1);
    }

    #[test]
    fn before_hooks_short_circuit_dispatch() {
        let hooks = HookMiddleware::new(
            Vec::new(),
            vec![Arc::new(|_: &Query| {
                Ok(Some(Answer::Full(Response::with_code(
                    ResponseCode::Refused,
                ))))
            })],
            Vec::new(),
        );
        let sink: QueryChain = Arc::new(|_| panic!("dispatch should not run"));
        let chain = compose_query_chain(vec![Arc::new(hooks)], sink);
        match chain(&query()).unwrap() {
            Resolution::Answered(response) => assert_eq!(response.code, ResponseCode::Refused),
            Resolution::Unmatched => panic!("expected an answer"),
        }
    }

    #[test]
    fn after_hooks_transform_the_response() {
        let hooks = HookMiddleware::new(
            Vec::new(),
            Vec::new(),
            vec![Arc::new(|mut response: Response| {
                response.code = ResponseCode::Refused;
                Ok(response)
            })],
        );
        let chain = compose_query_chain(vec![Arc::new(hooks)], answered_sink());
        match chain(&query()).unwrap() {
            Resolution::Answered(response) => assert_eq!(response.code, ResponseCode::Refused),
            Resolution::Unmatched => panic!("expected an answer"),
        }
    }

    #[test]
    fn after_hooks_do_not_run_on_unmatched() {
        let hooks = HookMiddleware::new(
            Vec::new(),
            Vec::new(),
            vec![Arc::new(|_| panic!("after hook should not run"))],
        );
        let sink: QueryChain = Arc::new(|_| Ok(Resolution::Unmatched));
        let chain = compose_query_chain(vec![Arc::new(hooks)], sink);
        assert!(matches!(chain(&query()).unwrap(), Resolution::Unmatched));
    }
}
