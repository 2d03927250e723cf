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

//! The rule container.
//!
//! A [`Scaffold`] holds rules in registration order, together with its
//! own query middleware stack, hooks, and exception handlers. Scaffolds
//! nest: one can be registered into another, either bare (probed for
//! every query) or mounted under an outer matcher, and the same
//! scaffold may be mounted at several places in the tree. The tree must
//! stay acyclic; registration fails if a scaffold would become
//! reachable from itself.
//!
//! Scaffolds are mutable while the application is being configured and
//! freeze into an immutable, composed chain the first time they are
//! asked to serve. Registration after the freeze fails with
//! [`ConfigurationError::Frozen`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock};

use hickory_proto::op::ResponseCode;
use log::debug;

use crate::error::{ConfigurationError, ErrorClass, RequestError};
use crate::middleware::{
    compose_query_chain, AfterHook, BeforeFirstHook, BeforeHook, HookMiddleware, QueryChain,
    QueryFaultHandler, QueryFaultMiddleware, QueryMiddleware, Resolution,
};
use crate::query::{Qtypes, Query};
use crate::response::{Answer, Response};
use crate::rules::{Action, Matcher, Rule};
use crate::suffix::{self, SuffixResolver};

////////////////////////////////////////////////////////////////////////
// SCAFFOLDS                                                          //
////////////////////////////////////////////////////////////////////////

/// An ordered, nestable container of dispatch rules.
pub struct Scaffold {
    name: String,
    config: RwLock<Config>,
    chain: OnceLock<QueryChain>,
}

#[derive(Default)]
struct Config {
    rules: Vec<Rule>,
    middlewares: Vec<Arc<dyn QueryMiddleware>>,
    fault_handlers: HashMap<ErrorClass, QueryFaultHandler>,
    before_first_hooks: Vec<BeforeFirstHook>,
    before_hooks: Vec<BeforeHook>,
    after_hooks: Vec<AfterHook>,
}

impl Scaffold {
    /// Creates a new, empty `Scaffold`. The name is used for logging.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config: RwLock::new(Config::default()),
            chain: OnceLock::new(),
        })
    }

    /// Returns the name of this `Scaffold`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether this `Scaffold` has been frozen by serving.
    pub fn is_frozen(&self) -> bool {
        self.chain.get().is_some()
    }

    ////////////////////////////////////////////////////////////////////
    // REGISTRATION                                                   //
    ////////////////////////////////////////////////////////////////////

    /// Registers a handler under a pattern string, interpreting the
    /// pattern with [`Matcher::smart`] and matching names without
    /// regard to case. Use [`Scaffold::register_rule`] for full
    /// control over the matcher.
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
        let matcher = Matcher::smart(pattern, false)?;
        self.register_rule(Rule::new(matcher, Qtypes::parse(qtypes)?, handler))
    }

    /// Appends a rule. Fails once the scaffold is frozen, or if the
    /// rule delegates to a scaffold that would form a cycle.
    pub fn register_rule(&self, rule: Rule) -> Result<(), ConfigurationError> {
        if let Action::Delegate(child) = rule.action() {
            self.check_for_cycle(child)?;
        }
        let mut config = self.lock_config()?;
        debug!("{}: registered rule {rule}", self.name);
        config.rules.push(rule);
        Ok(())
    }

    /// Registers a nested scaffold that is probed for every query,
    /// with no outer condition of its own.
    pub fn register_scaffold(&self, child: &Arc<Scaffold>) -> Result<(), ConfigurationError> {
        self.register_rule(Rule::delegate_all(child.clone()))
    }

    /// Mounts a nested scaffold under an outer matcher and type-set.
    /// Queries the matcher accepts are offered to the child; if the
    /// child has no matching rule, matching falls through to the next
    /// rule of this scaffold.
    pub fn mount(
        &self,
        matcher: Matcher,
        qtypes: Qtypes,
        child: &Arc<Scaffold>,
    ) -> Result<(), ConfigurationError> {
        self.register_rule(Rule::delegate(matcher, qtypes, child.clone()))
    }

    /// Appends a query middleware to this scaffold's stack.
    pub fn register_middleware(
        &self,
        middleware: Arc<dyn QueryMiddleware>,
    ) -> Result<(), ConfigurationError> {
        self.lock_config()?.middlewares.push(middleware);
        Ok(())
    }

    /// Registers an exception handler for an error class. Only one
    /// handler may exist per class; registering one for
    /// [`ErrorClass::Any`] replaces the built-in default.
    pub fn exception_handler<F>(
        &self,
        class: ErrorClass,
        handler: F,
    ) -> Result<(), ConfigurationError>
    where
        F: Fn(&Query, &RequestError) -> Result<Response, RequestError> + Send + Sync + 'static,
    {
        let mut config = self.lock_config()?;
        if config.fault_handlers.contains_key(&class) {
            return Err(ConfigurationError::DuplicateExceptionHandler(class));
        }
        config.fault_handlers.insert(class, Arc::new(handler));
        Ok(())
    }

    /// Registers a hook to run once, at the first query this scaffold
    /// serves.
    pub fn before_first_query<F>(&self, hook: F) -> Result<(), ConfigurationError>
    where
        F: Fn() -> Result<(), RequestError> + Send + Sync + 'static,
    {
        self.lock_config()?.before_first_hooks.push(Arc::new(hook));
        Ok(())
    }

    /// Registers a hook to run before each query reaches rule
    /// dispatch. A hook returning an [`Answer`] skips dispatch.
    pub fn before_query<F>(&self, hook: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&Query) -> Result<Option<Answer>, RequestError> + Send + Sync + 'static,
    {
        self.lock_config()?.before_hooks.push(Arc::new(hook));
        Ok(())
    }

    /// Registers a hook to run on each response this scaffold
    /// produces.
    pub fn after_query<F>(&self, hook: F) -> Result<(), ConfigurationError>
    where
        F: Fn(Response) -> Result<Response, RequestError> + Send + Sync + 'static,
    {
        self.lock_config()?.after_hooks.push(Arc::new(hook));
        Ok(())
    }

    fn lock_config(&self) -> Result<std::sync::RwLockWriteGuard<Config>, ConfigurationError> {
        if self.is_frozen() {
            return Err(ConfigurationError::Frozen);
        }
        Ok(self.config.write().expect("scaffold lock poisoned"))
    }

    /// Rejects a child that can already reach this scaffold.
    fn check_for_cycle(&self, child: &Arc<Scaffold>) -> Result<(), ConfigurationError> {
        let target = self as *const Scaffold;
        let mut visited = HashSet::new();
        if reaches(child, target, &mut visited) {
            return Err(ConfigurationError::MountCycle(child.name.clone()));
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////
    // RESOLUTION                                                     //
    ////////////////////////////////////////////////////////////////////

    /// Resolves a query against this scaffold's rules, freezing it on
    /// first use with the default suffix resolver. Returns
    /// [`Resolution::Unmatched`] when no rule applies.
    pub fn resolve(self: &Arc<Self>, query: &Query) -> Result<Resolution, RequestError> {
        let chain = self.freeze(false, &suffix::default_resolver());
        chain(query)
    }

    /// Freezes this scaffold (and, transitively, every nested
    /// scaffold) into a composed chain. The first freeze wins;
    /// subsequent calls return the existing chain.
    ///
    /// When `root` is true, an unmatched query becomes an `NXDomain`
    /// response at the dispatch sink, so this scaffold's after-query
    /// hooks still see it. Nested scaffolds instead report
    /// [`Resolution::Unmatched`] and let the enclosing scaffold fall
    /// through.
    pub(crate) fn freeze(
        self: &Arc<Self>,
        root: bool,
        resolver: &Arc<dyn SuffixResolver>,
    ) -> QueryChain {
        if let Some(chain) = self.chain.get() {
            return chain.clone();
        }
        let chain = self.compose(root, resolver);
        self.chain.get_or_init(|| chain).clone()
    }

    fn compose(self: &Arc<Self>, root: bool, resolver: &Arc<dyn SuffixResolver>) -> QueryChain {
        let config = self.config.read().expect("scaffold lock poisoned");

        // Children freeze first so the dispatch sink below can rely on
        // their chains being in place.
        for rule in &config.rules {
            if let Action::Delegate(child) = rule.action() {
                child.freeze(false, resolver);
            }
        }

        let mut stack: Vec<Arc<dyn QueryMiddleware>> = Vec::new();
        stack.push(Arc::new(QueryFaultMiddleware::new(
            config.fault_handlers.clone(),
        )));
        stack.extend(config.middlewares.iter().cloned());
        stack.push(Arc::new(HookMiddleware::new(
            config.before_first_hooks.clone(),
            config.before_hooks.clone(),
            config.after_hooks.clone(),
        )));

        let rules: Arc<[Rule]> = config.rules.clone().into();
        let resolver = resolver.clone();
        let name = self.name.clone();
        let sink: QueryChain = Arc::new(move |query: &Query| {
            for rule in rules.iter() {
                if !rule.matches(query, resolver.as_ref()) {
                    continue;
                }
                match rule.action() {
                    Action::Handle(handler) => {
                        debug!("{name}: matched rule {rule}");
                        return handler(query).map(|a| Resolution::Answered(a.into_response()));
                    }
                    Action::Delegate(child) => {
                        let chain = child
                            .chain
                            .get()
                            .expect("nested scaffolds freeze before their parents");
                        match chain(query)? {
                            Resolution::Answered(response) => {
                                return Ok(Resolution::Answered(response));
                            }
                            // The child had no matching rule; keep
                            // trying this scaffold's later rules.
                            Resolution::Unmatched => continue,
                        }
                    }
                }
            }
            debug!("{name}: no rule matched {query}");
            if root {
                Ok(Resolution::Answered(Response::with_code(
                    ResponseCode::NXDomain,
                )))
            } else {
                Ok(Resolution::Unmatched)
            }
        });

        compose_query_chain(stack, sink)
    }
}

/// Returns whether `target` is reachable from `scaffold` through
/// delegation rules.
fn reaches(
    scaffold: &Arc<Scaffold>,
    target: *const Scaffold,
    visited: &mut HashSet<*const Scaffold>,
) -> bool {
    let ptr = Arc::as_ptr(scaffold);
    if std::ptr::eq(ptr, target) {
        return true;
    }
    if !visited.insert(ptr) {
        return false;
    }
    let config = scaffold.config.read().expect("scaffold lock poisoned");
    config.rules.iter().any(|rule| match rule.action() {
        Action::Delegate(child) => reaches(child, target, visited),
        Action::Handle(_) => false,
    })
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use hickory_proto::rr::RecordType;

    use super::*;
    use crate::middleware::QueryNext;
    use crate::records;

    fn query(name: &str, qtype: RecordType) -> Query {
        Query::new(name.parse().unwrap(), qtype)
    }

    fn answer_ip(last: u8) -> impl Fn(&Query) -> Result<Answer, RequestError> {
        move |q: &Query| {
            Ok(Answer::One(records::a(
                &q.name,
                [127, 0, 0, last].into(),
                300,
            )))
        }
    }

    fn answered_names(resolution: Resolution) -> Vec<String> {
        match resolution {
            Resolution::Answered(response) => response
                .answers
                .iter()
                .map(|r| r.name().to_ascii())
                .collect(),
            Resolution::Unmatched => panic!("expected an answer"),
        }
    }

    #[test]
    fn the_first_matching_rule_wins() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let scaffold = Scaffold::new("order");
        for id in ["first", "second"] {
            let order = order.clone();
            scaffold
                .rule("example.com", &["A"], move |_q: &Query| {
                    order.lock().unwrap().push(id);
                    Ok(Answer::None)
                })
                .unwrap();
        }
        scaffold
            .resolve(&query("example.com", RecordType::A))
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn unmatched_queries_fall_out() {
        let scaffold = Scaffold::new("misses");
        scaffold.rule("example.com", &["A"], answer_ip(1)).unwrap();
        let resolution = scaffold
            .resolve(&query("example.com", RecordType::TXT))
            .unwrap();
        assert!(matches!(resolution, Resolution::Unmatched));
        let resolution = scaffold
            .resolve(&query("other.com", RecordType::A))
            .unwrap();
        assert!(matches!(resolution, Resolution::Unmatched));
    }

    #[test]
    fn nested_scaffolds_resolve_and_fall_through() {
        let outer = Scaffold::new("outer");
        let inner = Scaffold::new("inner");
        let deeper = Scaffold::new("deeper");

        outer.rule("s.com", &["A"], answer_ip(1)).unwrap();
        inner.rule("b1.com", &["A"], answer_ip(2)).unwrap();
        deeper.rule("b3.b2.com", &["A"], answer_ip(3)).unwrap();
        inner.register_scaffold(&deeper).unwrap();
        outer.register_scaffold(&inner).unwrap();

        for name in ["s.com", "b1.com", "b3.b2.com"] {
            let resolution = outer.resolve(&query(name, RecordType::A)).unwrap();
            assert_eq!(answered_names(resolution), vec![format!("{name}.")]);
        }
        for name in ["miss.s.com", "miss.b1.com", "miss.b3.b2.com"] {
            let resolution = outer.resolve(&query(name, RecordType::A)).unwrap();
            assert!(matches!(resolution, Resolution::Unmatched), "{name}");
        }
    }

    #[test]
    fn a_mounted_child_falls_through_to_later_siblings() {
        let outer = Scaffold::new("outer");
        let child = Scaffold::new("child");
        child.rule("www.example.com", &["A"], answer_ip(1)).unwrap();
        outer
            .mount(
                Matcher::zone("example.com", false).unwrap(),
                Qtypes::all(),
                &child,
            )
            .unwrap();
        outer.rule("example.com", &["NS"], |q: &Query| {
            Ok(Answer::One(records::ns(
                &q.name,
                &"ns1.example.com".parse().unwrap(),
                300,
            )))
        })
        .unwrap();

        // The mount matches (zone, all types) but the child has no NS
        // rule, so the sibling rule answers.
        let resolution = outer.resolve(&query("example.com", RecordType::NS)).unwrap();
        assert_eq!(answered_names(resolution), vec!["example.com.".to_owned()]);

        let resolution = outer
            .resolve(&query("www.example.com", RecordType::A))
            .unwrap();
        assert_eq!(answered_names(resolution), vec!["www.example.com.".to_owned()]);
    }

    #[test]
    fn mounting_a_cycle_fails() {
        let a = Scaffold::new("a");
        let b = Scaffold::new("b");
        let c = Scaffold::new("c");
        a.register_scaffold(&b).unwrap();
        b.register_scaffold(&c).unwrap();
        assert!(matches!(
            c.register_scaffold(&a),
            Err(ConfigurationError::MountCycle(_)),
        ));
        assert!(matches!(
            a.register_scaffold(&a),
            Err(ConfigurationError::MountCycle(_)),
        ));
    }

    #[test]
    fn mounting_the_same_child_twice_is_fine() {
        let outer = Scaffold::new("outer");
        let child = Scaffold::new("child");
        child.rule("*.au", &["A"], answer_ip(1)).unwrap();
        outer
            .mount(Matcher::zone("au", false).unwrap(), Qtypes::all(), &child)
            .unwrap();
        outer
            .mount(Matcher::zone("nz", false).unwrap(), Qtypes::all(), &child)
            .unwrap();
    }

    struct CountingMiddleware(AtomicUsize);

    impl QueryMiddleware for CountingMiddleware {
        fn handle(
            &self,
            query: &Query,
            next: &dyn QueryNext,
        ) -> Result<Resolution, RequestError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            next.call(query)
        }
    }

    #[test]
    fn a_shared_mount_fires_its_middleware_once_per_request() {
        let outer = Scaffold::new("outer");
        let child = Scaffold::new("child");
        let counter = Arc::new(CountingMiddleware(AtomicUsize::new(0)));
        child.register_middleware(counter.clone()).unwrap();
        child.rule("hello.*", &["A"], answer_ip(1)).unwrap();
        outer
            .mount(Matcher::zone("au", false).unwrap(), Qtypes::all(), &child)
            .unwrap();
        outer
            .mount(Matcher::zone("nz", false).unwrap(), Qtypes::all(), &child)
            .unwrap();

        outer.resolve(&query("hello.au", RecordType::A)).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        outer.resolve(&query("hello.nz", RecordType::A)).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn registration_fails_after_freezing() {
        let scaffold = Scaffold::new("frozen");
        scaffold.rule("example.com", &["A"], answer_ip(1)).unwrap();
        scaffold
            .resolve(&query("example.com", RecordType::A))
            .unwrap();

        assert_eq!(
            scaffold.rule("late.com", &["A"], answer_ip(2)).unwrap_err(),
            ConfigurationError::Frozen,
        );
        assert_eq!(
            scaffold
                .register_middleware(Arc::new(CountingMiddleware(AtomicUsize::new(0))))
                .unwrap_err(),
            ConfigurationError::Frozen,
        );
        assert_eq!(
            scaffold
                .exception_handler(ErrorClass::Any, |_, _| Ok(Response::new()))
                .unwrap_err(),
            ConfigurationError::Frozen,
        );
    }

    #[test]
    fn duplicate_exception_handlers_are_rejected() {
        let scaffold = Scaffold::new("dupes");
        scaffold
            .exception_handler(ErrorClass::Handler, |_, _| Ok(Response::new()))
            .unwrap();
        assert_eq!(
            scaffold
                .exception_handler(ErrorClass::Handler, |_, _| Ok(Response::new()))
                .unwrap_err(),
            ConfigurationError::DuplicateExceptionHandler(ErrorClass::Handler),
        );
    }

    #[test]
    fn handler_errors_become_servfail_by_default() {
        let scaffold = Scaffold::new("errors");
        scaffold
            .rule(
                "broken.com",
                &["A"],
                |_q: &Query| -> Result<Answer, RequestError> {
                    Err(RequestError::custom("ErrorForTesting", "boom"))
                },
            )
            .unwrap();
        let resolution = scaffold.resolve(&query("broken.com", RecordType::A)).unwrap();
        match resolution {
            Resolution::Answered(response) => {
                assert_eq!(response.code, ResponseCode::ServFail);
                assert!(response.answers.is_empty());
            }
            Resolution::Unmatched => panic!("expected an answer"),
        }
    }
}
