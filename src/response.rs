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

//! The response model and handler return-value coercion.

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::Record;

////////////////////////////////////////////////////////////////////////
// RESPONSES                                                          //
////////////////////////////////////////////////////////////////////////

/// The payload of a DNS reply produced by a rule handler.
///
/// A `Response` with code [`ResponseCode::NoError`] and no answers is
/// an explicit empty answer, which is distinct from the `NXDomain`
/// reply produced when no rule matched at all.
#[derive(Clone, Debug)]
pub struct Response {
    /// The response code of the reply.
    pub code: ResponseCode,

    /// Records for the answer section.
    pub answers: Vec<Record>,

    /// Records for the authority section.
    pub authority: Vec<Record>,

    /// Records for the additional section.
    pub additional: Vec<Record>,
}

impl Response {
    /// Creates an empty `NoError` response.
    pub fn new() -> Self {
        Self::with_code(ResponseCode::NoError)
    }

    /// Creates an empty response with the given response code.
    pub fn with_code(code: ResponseCode) -> Self {
        Self {
            code,
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////
// HANDLER RETURN VALUES                                              //
////////////////////////////////////////////////////////////////////////

/// What a rule handler may produce.
///
/// Handlers are free to return nothing, a single record, a list of
/// records, or a full [`Response`]; the framework normalizes all of
/// them with [`Answer::into_response`]. The record type returned is not
/// required to equal the query type.
#[derive(Clone, Debug)]
pub enum Answer {
    /// No records: an explicit empty `NoError` reply.
    None,

    /// A single answer record.
    One(Record),

    /// Several answer records.
    Many(Vec<Record>),

    /// A complete response, used as-is.
    Full(Response),
}

impl Answer {
    /// Normalizes this `Answer` into a [`Response`].
    pub fn into_response(self) -> Response {
        match self {
            Self::None => Response::new(),
            Self::One(record) => Response {
                answers: vec![record],
                ..Response::default()
            },
            Self::Many(records) => Response {
                answers: records,
                ..Response::default()
            },
            Self::Full(response) => response,
        }
    }
}

impl From<()> for Answer {
    fn from(_: ()) -> Self {
        Self::None
    }
}

impl From<Record> for Answer {
    fn from(record: Record) -> Self {
        Self::One(record)
    }
}

impl From<Vec<Record>> for Answer {
    fn from(records: Vec<Record>) -> Self {
        Self::Many(records)
    }
}

impl From<Response> for Answer {
    fn from(response: Response) -> Self {
        Self::Full(response)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records;

    fn record() -> Record {
        records::a(&"example.com".parse().unwrap(), [1, 2, 3, 4].into(), 300)
    }

    #[test]
    fn nothing_becomes_an_empty_noerror_response() {
        let response = Answer::None.into_response();
        assert_eq!(response.code, ResponseCode::NoError);
        assert!(response.answers.is_empty());
    }

    #[test]
    fn a_record_becomes_a_single_answer() {
        let response = Answer::from(record()).into_response();
        assert_eq!(response.code, ResponseCode::NoError);
        assert_eq!(response.answers.len(), 1);
    }

    #[test]
    fn a_list_becomes_the_answer_section() {
        let response = Answer::from(vec![record(), record()]).into_response();
        assert_eq!(response.answers.len(), 2);
    }

    #[test]
    fn a_full_response_is_used_as_is() {
        let mut full = Response::with_code(ResponseCode::Refused);
        full.authority.push(record());
        let response = Answer::from(full).into_response();
        assert_eq!(response.code, ResponseCode::Refused);
        assert_eq!(response.authority.len(), 1);
        assert!(response.answers.is_empty());
    }
}
