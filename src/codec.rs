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

//! The seam between the dispatch core and the DNS wire codec.
//!
//! The core treats wire records as opaque: everything that actually
//! reads or writes DNS messages funnels through this module, which
//! wraps hickory-proto. Decode failures surface as [`RequestError`]s
//! of class `Decode`.

use hickory_proto::op::{Header, Message};

use crate::error::RequestError;
use crate::name::Name;
use crate::query::Query;
use crate::response::Response;

/// Parses a wire message.
pub(crate) fn parse(bytes: &[u8]) -> Result<Message, RequestError> {
    Message::from_vec(bytes).map_err(|e| RequestError::decode(e.to_string()))
}

/// Serializes a reply with no size limit beyond the protocol's own.
pub(crate) fn encode(reply: &Message) -> Result<Vec<u8>, RequestError> {
    reply.to_vec().map_err(|e| RequestError::decode(e.to_string()))
}

/// Serializes a reply, truncating it if it exceeds `limit` bytes.
///
/// A truncated reply keeps the header and question and sets the TC
/// bit, leaving it to the client to retry over TCP.
pub(crate) fn encode_with_limit(reply: &Message, limit: usize) -> Result<Vec<u8>, RequestError> {
    let bytes = encode(reply)?;
    if bytes.len() <= limit {
        return Ok(bytes);
    }
    let mut truncated = Message::new();
    truncated.set_header(reply.header().clone());
    for question in reply.queries() {
        truncated.add_query(question.clone());
    }
    truncated.set_truncated(true);
    encode(&truncated)
}

/// Builds the skeleton of a reply to `request`: the response header
/// derived from the request header, with the question echoed back.
pub(crate) fn reply_skeleton(request: &Message) -> Message {
    let mut reply = Message::new();
    reply.set_header(Header::response_from_request(request.header()));
    for question in request.queries() {
        reply.add_query(question.clone());
    }
    reply
}

/// Decodes the question of `record` into a [`Query`]. The caller has
/// already checked that exactly one question is present.
pub(crate) fn question_to_query(record: &Message) -> Result<Query, RequestError> {
    let question = record
        .queries()
        .first()
        .ok_or_else(|| RequestError::decode("message has no question"))?;
    let name = Name::from_wire(question.name())
        .map_err(|e| RequestError::decode(format!("bad question name: {e}")))?;
    Ok(Query::new(name, question.query_type()))
}

/// Writes a handler's [`Response`] into a reply message.
pub(crate) fn apply_response(reply: &mut Message, response: Response) {
    reply.set_response_code(response.code);
    for record in response.answers {
        reply.add_answer(record);
    }
    for record in response.authority {
        reply.add_name_server(record);
    }
    for record in response.additional {
        reply.add_additional(record);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use hickory_proto::op::{MessageType, OpCode, Query as WireQuery, ResponseCode};
    use hickory_proto::rr::RecordType;

    use super::*;
    use crate::records;

    fn question(name: &str, qtype: RecordType) -> Message {
        let mut message = Message::new();
        message.set_id(0x1234);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(WireQuery::query(
            name.parse().unwrap(),
            qtype,
        ));
        message
    }

    #[test]
    fn parse_and_encode_round_trip() {
        let message = question("example.com.", RecordType::A);
        let bytes = encode(&message).unwrap();
        let reparsed = parse(&bytes).unwrap();
        assert_eq!(reparsed.id(), 0x1234);
        assert_eq!(reparsed.queries().len(), 1);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse(&[0x00, 0x01, 0x02]).is_err());
    }

    #[test]
    fn reply_skeleton_copies_id_and_question() {
        let request = question("example.com.", RecordType::A);
        let reply = reply_skeleton(&request);
        assert_eq!(reply.id(), request.id());
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.op_code(), OpCode::Query);
        assert!(reply.recursion_desired());
        assert_eq!(reply.queries(), request.queries());
    }

    #[test]
    fn question_decodes_into_a_query() {
        let request = question("WWW.Example.COM.", RecordType::TXT);
        let query = question_to_query(&request).unwrap();
        assert_eq!(query.name, "www.example.com".parse().unwrap());
        assert_eq!(query.qtype, RecordType::TXT);
    }

    #[test]
    fn responses_fill_the_reply_sections() {
        let request = question("example.com.", RecordType::A);
        let mut reply = reply_skeleton(&request);
        let name: Name = "example.com".parse().unwrap();
        let response = Response {
            code: ResponseCode::NoError,
            answers: vec![records::a(&name, [1, 2, 3, 4].into(), 300)],
            authority: vec![records::ns(&name, &"ns1.example.com".parse().unwrap(), 300)],
            additional: vec![records::a(
                &"ns1.example.com".parse().unwrap(),
                [5, 6, 7, 8].into(),
                300,
            )],
        };
        apply_response(&mut reply, response);
        assert_eq!(reply.answers().len(), 1);
        assert_eq!(reply.name_servers().len(), 1);
        assert_eq!(reply.additionals().len(), 1);
    }

    #[test]
    fn oversized_replies_are_truncated() {
        let request = question("example.com.", RecordType::A);
        let mut reply = reply_skeleton(&request);
        let name: Name = "example.com".parse().unwrap();
        let answers = (0..40)
            .map(|i| records::a(&name, [10, 0, (i >> 8) as u8, i as u8].into(), 300))
            .collect();
        apply_response(
            &mut reply,
            Response {
                code: ResponseCode::NoError,
                answers,
                authority: Vec::new(),
                additional: Vec::new(),
            },
        );

        let bytes = encode_with_limit(&reply, 512).unwrap();
        assert!(bytes.len() <= 512);
        let truncated = parse(&bytes).unwrap();
        assert!(truncated.truncated());
        assert!(truncated.answers().is_empty());
        assert_eq!(truncated.queries().len(), 1);

        // Under the limit nothing changes.
        let full = encode_with_limit(&reply, u16::MAX as usize).unwrap();
        let full = parse(&full).unwrap();
        assert!(!full.truncated());
        assert_eq!(full.answers().len(), 40);
    }
}
