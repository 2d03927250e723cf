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

//! The decoded query model and rule type-sets.

use std::fmt;
use std::str::FromStr;

use hickory_proto::rr::RecordType;

use crate::error::ConfigurationError;
use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// QUERIES                                                            //
////////////////////////////////////////////////////////////////////////

/// A simplified view of a DNS question: the queried name and type.
///
/// This is what rule handlers receive. It is immutable for the lifetime
/// of a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Query {
    /// The queried name.
    pub name: Name,

    /// The queried record type.
    pub qtype: RecordType,
}

impl Query {
    /// Creates a new `Query`.
    pub fn new(name: Name, qtype: RecordType) -> Self {
        Self { name, qtype }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.name, self.qtype)
    }
}

////////////////////////////////////////////////////////////////////////
// TYPE SETS                                                          //
////////////////////////////////////////////////////////////////////////

/// The set of query types a rule is willing to answer.
///
/// A rule matches query type `T` when `T` is in the set, when the set
/// contains the `ANY` pseudo-type, or when the set is the symbolic
/// "all types" set produced by [`Qtypes::all`].
#[derive(Clone, Debug)]
pub struct Qtypes(Repr);

#[derive(Clone, Debug)]
enum Repr {
    All,
    Listed(Vec<RecordType>),
}

impl Qtypes {
    /// The set of every handleable query type.
    pub fn all() -> Self {
        Self(Repr::All)
    }

    /// Builds a set from explicit record types.
    pub fn of(types: &[RecordType]) -> Self {
        Self(Repr::Listed(types.to_vec()))
    }

    /// Parses a set from textual type names (`"A"`, `"AAAA"`, `"ANY"`,
    /// ...).
    pub fn parse(names: &[&str]) -> Result<Self, ConfigurationError> {
        let mut types = Vec::with_capacity(names.len());
        for name in names {
            let qtype = RecordType::from_str(&name.to_ascii_uppercase())
                .map_err(|_| ConfigurationError::UnknownQtype((*name).to_owned()))?;
            types.push(qtype);
        }
        Ok(Self(Repr::Listed(types)))
    }

    /// Returns whether this set permits queries of type `qtype`.
    pub fn permits(&self, qtype: RecordType) -> bool {
        match &self.0 {
            Repr::All => true,
            Repr::Listed(types) => {
                types.contains(&qtype) || types.contains(&RecordType::ANY)
            }
        }
    }

    /// Returns whether this is the symbolic all-types set.
    pub fn is_all(&self) -> bool {
        matches!(self.0, Repr::All)
    }
}

impl From<&[RecordType]> for Qtypes {
    fn from(types: &[RecordType]) -> Self {
        Self::of(types)
    }
}

impl fmt::Display for Qtypes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.0 {
            Repr::All => f.write_str("*"),
            Repr::Listed(types) => {
                for (i, qtype) in types.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{qtype}")?;
                }
                Ok(())
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
