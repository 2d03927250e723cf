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

//! Rules and the matching engine.
//!
//! A [`Rule`] pairs a name [`Matcher`] and a query type-set with an
//! action: either a handler to invoke or a nested
//! [`Scaffold`](crate::scaffold::Scaffold) to delegate to. Matchers
//! come in four variants:
//!
//! * **static**: label-wise equality with a fixed name;
//! * **zone**: the apex itself or any deeper name under it;
//! * **glob**: the wildcard-string grammar described at
//!   [`Matcher::glob`];
//! * **regex**: a full match of the whole name text.
//!
//! Each matcher carries its own case-sensitivity flag. Within a
//! container, the first rule whose matcher and type-set both accept the
//! query wins.

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::error::{ConfigurationError, RequestError};
use crate::name::Name;
use crate::query::{Qtypes, Query};
use crate::response::Answer;
use crate::scaffold::Scaffold;
use crate::suffix::SuffixResolver;

////////////////////////////////////////////////////////////////////////
// MATCHERS                                                           //
////////////////////////////////////////////////////////////////////////

/// The name-matching half of a rule.
#[derive(Clone, Debug)]
pub enum Matcher {
    /// Matches exactly one name.
    Static {
        name: Name,
        case_sensitive: bool,
    },

    /// Matches the apex and everything below it.
    Zone {
        apex: Name,
        case_sensitive: bool,
    },

    /// Matches the wildcard-string grammar.
    Glob(GlobPattern),

    /// Matches a regular expression against the whole name.
    Regex(RegexMatcher),
}

impl Matcher {
    /// Creates a matcher for exactly `name`.
    pub fn exact(name: &str, case_sensitive: bool) -> Result<Self, ConfigurationError> {
        Ok(Self::Static {
            name: name.parse()?,
            case_sensitive,
        })
    }

    /// Creates a matcher for `apex` and every name below it. The root
    /// apex matches everything.
    pub fn zone(apex: &str, case_sensitive: bool) -> Result<Self, ConfigurationError> {
        Ok(Self::Zone {
            apex: apex.parse()?,
            case_sensitive,
        })
    }

    /// Creates a matcher for a wildcard string.
    ///
    /// The pattern is split into per-label tokens:
    ///
    /// * a literal label matches itself;
    /// * `*` matches exactly one label (never zero);
    /// * `**` matches one or more labels;
    /// * `{base_domain}` matches the label sequence of the query
    ///   name's registrable base domain, however many labels that is.
    ///
    /// The whole query name must be consumed. `**` may not be adjacent
    /// to another `**`, `{base_domain}` may appear at most once, and
    /// the pattern may not be empty.
    pub fn glob(pattern: &str, case_sensitive: bool) -> Result<Self, ConfigurationError> {
        GlobPattern::parse(pattern, case_sensitive).map(Self::Glob)
    }

    /// Creates a matcher from a compiled regular expression. The
    /// expression must match the entire name text; case-insensitive
    /// matchers recompile it with case folding enabled.
    pub fn regex(pattern: &Regex, case_sensitive: bool) -> Result<Self, ConfigurationError> {
        RegexMatcher::new(pattern, case_sensitive).map(Self::Regex)
    }

    /// Creates a matcher from a pattern string, guessing the variant:
    /// a string containing a wildcard token (`*` or `{base_domain}`)
    /// becomes a glob, anything else is static. Use the explicit
    /// constructors to bypass the guess.
    pub fn smart(pattern: &str, case_sensitive: bool) -> Result<Self, ConfigurationError> {
        if pattern.contains('*') || pattern.contains("{base_domain}") {
            Self::glob(pattern, case_sensitive)
        } else {
            Self::exact(pattern, case_sensitive)
        }
    }

    /// Tests this matcher against a query name.
    pub fn matches(&self, name: &Name, resolver: &dyn SuffixResolver) -> bool {
        match self {
            Self::Static {
                name: fixed,
                case_sensitive,
            } => name.equivalent(fixed, *case_sensitive),
            Self::Zone {
                apex,
                case_sensitive,
            } => name.is_subdomain_of(apex, *case_sensitive),
            Self::Glob(glob) => glob.matches(name, resolver),
            Self::Regex(regex) => regex.matches(name),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Static { name, .. } => write!(f, "{name}"),
            Self::Zone { apex, .. } => write!(f, "{apex} and below"),
            Self::Glob(glob) => write!(f, "{}", glob.text),
            Self::Regex(regex) => write!(f, "/{}/", regex.source),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// GLOB PATTERNS                                                      //
////////////////////////////////////////////////////////////////////////

/// A compiled wildcard-string pattern. See [`Matcher::glob`] for the
/// grammar.
#[derive(Clone, Debug)]
pub struct GlobPattern {
    tokens: Vec<GlobToken>,
    case_sensitive: bool,
    text: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum GlobToken {
    Literal(Box<str>),
    Star,
    DoubleStar,
    BaseDomain,
}

impl GlobPattern {
    fn parse(pattern: &str, case_sensitive: bool) -> Result<Self, ConfigurationError> {
        if pattern.is_empty() {
            return Err(ConfigurationError::EmptyPattern);
        }
        let mut tokens = Vec::new();
        for part in pattern.split('.') {
            let token = match part {
                "*" => GlobToken::Star,
                "**" => GlobToken::DoubleStar,
                "{base_domain}" => GlobToken::BaseDomain,
                literal => {
                    // Validate literals through the name parser so the
                    // usual label limits apply.
                    let _: Name = literal.parse()?;
                    GlobToken::Literal(literal.into())
                }
            };
            if token == GlobToken::DoubleStar
                && tokens.last() == Some(&GlobToken::DoubleStar)
            {
                return Err(ConfigurationError::InvalidPattern(
                    "`**` may not be adjacent to another `**`".to_owned(),
                ));
            }
            tokens.push(token);
        }
        let base_domain_count = tokens
            .iter()
            .filter(|t| **t == GlobToken::BaseDomain)
            .count();
        if base_domain_count > 1 {
            return Err(ConfigurationError::InvalidPattern(
                "`{base_domain}` may appear at most once".to_owned(),
            ));
        }
        Ok(Self {
            tokens,
            case_sensitive,
            text: pattern.to_owned(),
        })
    }

    /// Tests the pattern against a query name.
    pub fn matches(&self, name: &Name, resolver: &dyn SuffixResolver) -> bool {
        // The base domain is derived from the query name itself, so it
        // is resolved once per match attempt. If the pattern needs it
        // and it cannot be resolved, the rule does not match.
        let needs_base = self.tokens.contains(&GlobToken::BaseDomain);
        let base = if needs_base {
            match resolver.base_domain(name) {
                Some(base) => base,
                None => return false,
            }
        } else {
            Name::root()
        };
        let base_labels: Vec<&str> = base.labels().collect();
        let labels: Vec<&str> = name.labels().collect();
        self.match_tokens(&self.tokens, &labels, &base_labels)
    }

    fn match_tokens(&self, tokens: &[GlobToken], labels: &[&str], base: &[&str]) -> bool {
        let (token, rest) = match tokens.split_first() {
            Some(pair) => pair,
            None => return labels.is_empty(),
        };
        match token {
            GlobToken::Literal(literal) => match labels.split_first() {
                Some((label, remaining)) => {
                    self.label_eq(literal, label) && self.match_tokens(rest, remaining, base)
                }
                None => false,
            },
            GlobToken::Star => match labels.split_first() {
                Some((_, remaining)) => self.match_tokens(rest, remaining, base),
                None => false,
            },
            GlobToken::DoubleStar => {
                // One or more labels, greedy, backtracking when the
                // remainder fails.
                (1..=labels.len())
                    .rev()
                    .any(|taken| self.match_tokens(rest, &labels[taken..], base))
            }
            GlobToken::BaseDomain => {
                // The expansion comes from the query name, so it is
                // compared without regard to case even in
                // case-sensitive patterns.
                if labels.len() < base.len() || base.is_empty() {
                    return false;
                }
                let (expansion, remaining) = labels.split_at(base.len());
                expansion
                    .iter()
                    .zip(base)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
                    && self.match_tokens(rest, remaining, base)
            }
        }
    }

    fn label_eq(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }
}

////////////////////////////////////////////////////////////////////////
// REGEX MATCHERS                                                     //
////////////////////////////////////////////////////////////////////////

/// A compiled regular-expression matcher. The user's expression is
/// anchored so that it must match the entire name text.
#[derive(Clone, Debug)]
pub struct RegexMatcher {
    anchored: Regex,
    source: String,
}

impl RegexMatcher {
    fn new(pattern: &Regex, case_sensitive: bool) -> Result<Self, ConfigurationError> {
        let source = pattern.as_str().to_owned();
        let anchored = RegexBuilder::new(&format!("^(?:{source})$"))
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| ConfigurationError::InvalidPattern(e.to_string()))?;
        Ok(Self { anchored, source })
    }

    /// Tests the expression against a query name.
    pub fn matches(&self, name: &Name) -> bool {
        self.anchored.is_match(&name.to_string())
    }
}

////////////////////////////////////////////////////////////////////////
// RULES                                                              //
////////////////////////////////////////////////////////////////////////

/// The result a rule handler produces.
pub type HandlerResult = Result<Answer, RequestError>;

/// A rule handler: a function from a query to an [`Answer`].
pub type RuleHandler = Arc<dyn Fn(&Query) -> HandlerResult + Send + Sync>;

/// A single dispatch rule: a matcher, the query types it accepts, and
/// what to do on a match.
#[derive(Clone)]
pub struct Rule {
    matcher: Matcher,
    qtypes: Qtypes,
    action: Action,
}

#[derive(Clone)]
pub(crate) enum Action {
    Handle(RuleHandler),
    Delegate(Arc<Scaffold>),
}

impl Rule {
    /// Creates a rule that invokes `handler` on a match. The handler
    /// may return anything that coerces to an [`Answer`].
    pub fn new<F, A>(matcher: Matcher, qtypes: Qtypes, handler: F) -> Self
    where
        F: Fn(&Query) -> Result<A, RequestError> + Send + Sync + 'static,
        A: Into<Answer>,
    {
        Self {
            matcher,
            qtypes,
            action: Action::Handle(Arc::new(move |query| handler(query).map(Into::into))),
        }
    }

    /// Creates a rule from an already-shared handler, so one handler
    /// can be registered under several rules (or on several
    /// scaffolds).
    pub fn with_handler(matcher: Matcher, qtypes: Qtypes, handler: RuleHandler) -> Self {
        Self {
            matcher,
            qtypes,
            action: Action::Handle(handler),
        }
    }

    /// Creates a rule that delegates matching queries to a nested
    /// scaffold. If the scaffold has no matching rule either, matching
    /// continues with the next rule of the outer container.
    pub fn delegate(matcher: Matcher, qtypes: Qtypes, child: Arc<Scaffold>) -> Self {
        Self {
            matcher,
            qtypes,
            action: Action::Delegate(child),
        }
    }

    /// Creates a rule that probes a nested scaffold for every query,
    /// with no outer name or type condition of its own.
    pub fn delegate_all(child: Arc<Scaffold>) -> Self {
        Self {
            matcher: Matcher::Zone {
                apex: Name::root(),
                case_sensitive: false,
            },
            qtypes: Qtypes::all(),
            action: Action::Delegate(child),
        }
    }

    /// Returns whether this rule's matcher and type-set both accept
    /// the query.
    pub fn matches(&self, query: &Query, resolver: &dyn SuffixResolver) -> bool {
        self.qtypes.permits(query.qtype) && self.matcher.matches(&query.name, resolver)
    }

    pub(crate) fn action(&self) -> &Action {
        &self.action
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.action {
            Action::Handle(_) => write!(f, "{} [{}]", self.matcher, self.qtypes),
            Action::Delegate(child) => {
                write!(f, "{} [{}] -> {}", self.matcher, self.qtypes, child.name())
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
