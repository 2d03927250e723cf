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

//! Implementation of the domain-name type used for rule matching.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use hickory_proto::rr::Name as WireName;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length on the wire).
const MAX_LABEL_LEN: usize = 63;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A domain name: an ordered sequence of labels.
///
/// Names are kept in canonical form, with the trailing empty (root)
/// label stripped; the root name itself has zero labels and displays as
/// `.`. Labels preserve the case in which they were written, but the
/// [`PartialEq`] and [`Hash`] implementations are ASCII
/// case-insensitive, which is the default comparison throughout the
/// crate. Use [`Name::equivalent`] when a rule asks for case-sensitive
/// matching.
///
/// `Name`s can be constructed through the [`FromStr`] implementation
/// (which enforces the label and total length limits of [RFC 1035 §
/// 3.1]) or from a codec name through [`Name::from_wire`].
///
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
#[derive(Clone, Debug, Default)]
pub struct Name {
    labels: Vec<Box<str>>,
}

impl Name {
    /// Returns the root name, `.`.
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    /// Returns whether this `Name` is the DNS root.
    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the number of labels in this `Name`. The root has zero.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns whether this `Name` has no labels (i.e. is the root).
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns an iterator over the labels of this `Name`, leftmost
    /// first.
    pub fn labels(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.labels.iter().map(|label| &**label)
    }

    /// Returns the label at `index`, or [`None`] if out of range.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|label| &**label)
    }

    /// Compares two names label-wise. When `case_sensitive` is false,
    /// labels are compared without regard to ASCII case.
    pub fn equivalent(&self, other: &Name, case_sensitive: bool) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels()
                .zip(other.labels())
                .all(|(a, b)| label_eq(a, b, case_sensitive))
    }

    /// Returns whether this `Name` is equal to `parent` or ends with
    /// `parent`'s labels at a label boundary. The root name is the
    /// parent of every name.
    pub fn is_subdomain_of(&self, parent: &Name, case_sensitive: bool) -> bool {
        self.labels.len() >= parent.labels.len()
            && self
                .labels()
                .rev()
                .zip(parent.labels().rev())
                .all(|(a, b)| label_eq(a, b, case_sensitive))
    }

    /// Returns a copy of this `Name` with all ASCII letters lowercased.
    pub fn to_lowercase(&self) -> Name {
        Name {
            labels: self
                .labels
                .iter()
                .map(|l| l.to_ascii_lowercase().into_boxed_str())
                .collect(),
        }
    }

    /// Builds a `Name` from labels that have already been validated by
    /// the codec. Lengths are still checked so the canonical-form
    /// invariants hold.
    fn from_labels<I, S>(labels: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut collected = Vec::new();
        let mut wire_len = 1;
        for label in labels {
            let label = label.as_ref();
            validate_label(label)?;
            wire_len += 1 + label.len();
            if wire_len > MAX_WIRE_LEN {
                return Err(Error::NameTooLong);
            }
            collected.push(label.into());
        }
        Ok(Self { labels: collected })
    }

    /// Converts a codec name into a `Name`, stripping the trailing root
    /// label.
    pub fn from_wire(wire: &WireName) -> Result<Self, Error> {
        let text = wire.to_ascii();
        text.parse()
    }

    /// Converts this `Name` into the codec's fully qualified name type.
    pub fn to_wire(&self) -> WireName {
        // The labels were validated at construction, so the fully
        // qualified presentation form is always acceptable to the
        // codec.
        let mut text = String::new();
        for label in self.labels() {
            text.push_str(label);
            text.push('.');
        }
        if text.is_empty() {
            text.push('.');
        }
        WireName::from_ascii(&text).expect("labels validated at construction")
    }
}

/// Compares two labels, optionally folding ASCII case.
fn label_eq(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

/// Checks that a label is non-empty ASCII of acceptable length.
fn validate_label(label: &str) -> Result<(), Error> {
    if label.is_empty() {
        Err(Error::EmptyLabel)
    } else if !label.is_ascii() {
        Err(Error::NotAscii)
    } else if label.len() > MAX_LABEL_LEN {
        Err(Error::LabelTooLong)
    } else {
        Ok(())
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Error> {
        // The canonical form has no trailing dot; accept one anyway so
        // fully qualified names (including the bare root ".") parse.
        let trimmed = text.strip_suffix('.').unwrap_or(text);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Self::from_labels(trimmed.split('.'))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for (i, label) in self.labels().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(label)?;
        }
        Ok(())
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.equivalent(other, false)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in self.labels() {
            for byte in label.bytes() {
                state.write_u8(byte.to_ascii_lowercase());
            }
            state.write_u8(b'.');
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error type used to report problems constructing a [`Name`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// A label was empty (for example, from a doubled dot).
    EmptyLabel,

    /// A label was longer than 63 octets.
    LabelTooLong,

    /// The name is too long (longer than 255 octets on the wire).
    NameTooLong,

    /// The name was not strictly ASCII.
    NotAscii,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::EmptyLabel => f.write_str("label is empty"),
            Self::LabelTooLong => f.write_str("label is longer than 63 bytes"),
            Self::NameTooLong => f.write_str("name is longer than 255 bytes on the wire"),
            Self::NotAscii => f.write_str("name is not ASCII"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_labels() {
        let name: Name = "www.example.com".parse().unwrap();
        let labels: Vec<&str> = name.labels().collect();
        assert_eq!(labels, vec!["www", "example", "com"]);
    }

    #[test]
    fn parse_accepts_trailing_dot() {
        let a: Name = "example.com.".parse().unwrap();
        let b: Name = "example.com".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_accepts_the_root() {
        assert!(".".parse::<Name>().unwrap().is_root());
        assert!("".parse::<Name>().unwrap().is_root());
    }

    #[test]
    fn parse_rejects_empty_labels() {
        assert_eq!("a..b".parse::<Name>(), Err(Error::EmptyLabel));
    }

    #[test]
    fn parse_rejects_long_labels() {
        let label = "x".repeat(64);
        assert_eq!(label.parse::<Name>(), Err(Error::LabelTooLong));
    }

    #[test]
    fn parse_rejects_long_names() {
        let name = ["x".repeat(63).as_str(); 4].join(".");
        assert_eq!(name.parse::<Name>(), Err(Error::NameTooLong));
    }

    #[test]
    fn display_round_trips() {
        for text in ["example.com", "a.b.c.d", "."] {
            let name: Name = text.parse().unwrap();
            let reparsed: Name = name.to_string().parse().unwrap();
            assert_eq!(name, reparsed);
        }
    }

    #[test]
    fn comparison_is_case_insensitive_by_default() {
        let a: Name = "ExAmPlE.CoM".parse().unwrap();
        let b: Name = "example.com".parse().unwrap();
        assert_eq!(a, b);
        assert!(a.equivalent(&b, false));
        assert!(!a.equivalent(&b, true));
    }

    #[test]
    fn subdomain_matches_at_label_boundaries() {
        let parent: Name = "example.com".parse().unwrap();
        let child: Name = "www.example.com".parse().unwrap();
        let lookalike: Name = "notexample.com".parse().unwrap();
        assert!(child.is_subdomain_of(&parent, false));
        assert!(parent.is_subdomain_of(&parent, false));
        assert!(!lookalike.is_subdomain_of(&parent, false));
        assert!(!parent.is_subdomain_of(&child, false));
    }

    #[test]
    fn everything_is_a_subdomain_of_the_root() {
        let root = Name::root();
        let name: Name = "deep.example.com".parse().unwrap();
        assert!(name.is_subdomain_of(&root, false));
        assert!(root.is_subdomain_of(&root, false));
    }

    #[test]
    fn subdomain_respects_case_sensitivity() {
        let parent: Name = "example.com".parse().unwrap();
        let child: Name = "www.EXAMPLE.com".parse().unwrap();
        assert!(child.is_subdomain_of(&parent, false));
        assert!(!child.is_subdomain_of(&parent, true));
    }

    #[test]
    fn wire_conversion_round_trips() {
        let name: Name = "www.example.com".parse().unwrap();
        let wire = name.to_wire();
        assert!(wire.is_fqdn());
        assert_eq!(Name::from_wire(&wire).unwrap(), name);
    }

    #[test]
    fn root_converts_to_wire() {
        let wire = Name::root().to_wire();
        assert!(Name::from_wire(&wire).unwrap().is_root());
    }
}
