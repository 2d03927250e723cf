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

//! A programmable DNS name-server framework.
//!
//! Signpost lets an application register handlers against query-name
//! patterns and types, then serves DNS queries over UDP and TCP by
//! routing each parsed query to the first matching handler:
//!
//! ```no_run
//! use signpost::{records, Query, RequestError, Server};
//!
//! fn main() -> std::io::Result<()> {
//!     let server = Server::new("example");
//!
//!     // Static names, zone suffixes, wildcard strings, and regular
//!     // expressions all work as patterns; rules are tried in
//!     // registration order.
//!     server
//!         .rule("**.example.com", &["A"], |query: &Query| {
//!             Ok::<_, RequestError>(records::a(&query.name, [1, 2, 3, 4].into(), 300))
//!         })
//!         .expect("failed to register rule");
//!
//!     server.run()
//! }
//! ```
//!
//! Handlers may return nothing, a record, a list of records, or a full
//! [`Response`]; anything else a handler needs to express travels
//! through the two middleware stacks (one over raw wire records, one
//! over decoded queries) and their exception handlers. Rules live in
//! nestable [`Scaffold`] containers, so a subtree of rules can be
//! reused under several mount points.
//!
//! The framework answers `OPCODE=QUERY` only. It is not a recursive
//! resolver, a zone-file engine, or a general DNS library; wire
//! parsing is delegated to hickory-proto, and public-suffix data (for
//! `{base_domain}` patterns) to a pluggable [`SuffixResolver`].

mod codec;
pub mod error;
mod middleware;
pub mod name;
mod query;
pub mod records;
mod response;
mod rules;
mod scaffold;
mod server;
mod settings;
mod suffix;
pub mod transport;

pub use error::{ConfigurationError, ErrorClass, RequestError};
pub use middleware::{
    QueryMiddleware, QueryNext, RawMiddleware, RawNext, Resolution,
};
pub use name::Name;
pub use query::{Qtypes, Query};
pub use response::{Answer, Response};
pub use rules::{GlobPattern, HandlerResult, Matcher, RegexMatcher, Rule, RuleHandler};
pub use scaffold::Scaffold;
pub use server::{Engine, Server};
pub use settings::{Settings, Transport};
pub use suffix::{PslResolver, SuffixResolver};

// The codec's record and message types appear throughout the public
// API; re-export the common ones so applications need not depend on
// the codec crate directly.
pub use hickory_proto::op::{Message, ResponseCode};
pub use hickory_proto::rr::{Record, RecordType};
