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

//! Public-suffix resolution.
//!
//! Wildcard rules may contain the `{base_domain}` token, which expands
//! to the registrable domain of the query name. Working that out
//! requires public-suffix data, which is outside the matching engine
//! proper, so it sits behind the [`SuffixResolver`] trait and is
//! injected into the server. The default implementation,
//! [`PslResolver`], uses a compiled snapshot of the public suffix list.

use std::str;
use std::sync::Arc;

use psl::{List, Psl};

use crate::name::Name;

/// Resolves the registrable "base domain" of a query name.
///
/// For a name under a known public suffix, the base domain is the
/// suffix plus one more label (`foo.com.au` for `www.foo.com.au`). For
/// names under suffixes that are not on the public suffix list (such as
/// `.internal` or `.local`), the base domain is the last label alone.
///
/// Implementations must be thread-safe; the server shares one resolver
/// across all in-flight requests.
pub trait SuffixResolver: Send + Sync {
    /// Returns the base domain of `name`, or [`None`] when it cannot be
    /// determined (in which case any rule depending on it simply does
    /// not match).
    fn base_domain(&self, name: &Name) -> Option<Name>;
}

/// The default [`SuffixResolver`], backed by the public suffix list
/// compiled into the `psl` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct PslResolver;

impl SuffixResolver for PslResolver {
    fn base_domain(&self, name: &Name) -> Option<Name> {
        if name.is_root() {
            return None;
        }
        let text = name.to_string().to_ascii_lowercase();
        if let Some(domain) = List.domain(text.as_bytes()) {
            if domain.suffix().is_known() {
                let text = str::from_utf8(domain.as_bytes()).ok()?;
                return text.parse().ok();
            }
        }
        // Not a public suffix: the base domain is the last label.
        name.label(name.len() - 1)?.parse().ok()
    }
}

/// Returns the resolver used when none is injected.
pub(crate) fn default_resolver() -> Arc<dyn SuffixResolver> {
    Arc::new(PslResolver)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn base(text: &str) -> Option<String> {
        let name: Name = text.parse().unwrap();
        PslResolver.base_domain(&name).map(|n| n.to_string())
    }

    #[test]
    fn known_suffixes_resolve_to_suffix_plus_one() {
        assert_eq!(base("tld.com").as_deref(), Some("tld.com"));
        assert_eq!(base("www.foo.com").as_deref(), Some("foo.com"));
        assert_eq!(base("etld.com.au").as_deref(), Some("etld.com.au"));
        assert_eq!(base("deep.sub.etld.com.au").as_deref(), Some("etld.com.au"));
    }

    #[test]
    fn unknown_suffixes_resolve_to_the_last_label() {
        assert_eq!(base("internal").as_deref(), Some("internal"));
        assert_eq!(base("cat.1.dog.1.internal").as_deref(), Some("internal"));
        assert_eq!(base("router.local").as_deref(), Some("local"));
    }

    #[test]
    fn resolution_folds_case() {
        assert_eq!(base("ETLD.com.AU").as_deref(), Some("etld.com.au"));
    }

    #[test]
    fn the_root_has_no_base_domain() {
        assert_eq!(base("."), None);
    }
}
