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

//! Constructors for common resource records.
//!
//! Rule handlers usually want to answer with one of a handful of record
//! types; these helpers build them without going through the codec's
//! rdata types by hand. All records are constructed in class IN.

use std::net::{Ipv4Addr, Ipv6Addr};

use hickory_proto::rr::rdata;
use hickory_proto::rr::{DNSClass, RData, Record};

use crate::name::Name;

/// Builds a record in class IN from a name, TTL, and rdata.
fn record(name: &Name, ttl: u32, rdata: RData) -> Record {
    let mut record = Record::from_rdata(name.to_wire(), ttl, rdata);
    record.set_dns_class(DNSClass::IN);
    record
}

/// Builds an IPv4 address (`A`) record.
pub fn a(name: &Name, addr: Ipv4Addr, ttl: u32) -> Record {
    record(name, ttl, RData::A(rdata::A(addr)))
}

/// Builds an IPv6 address (`AAAA`) record.
pub fn aaaa(name: &Name, addr: Ipv6Addr, ttl: u32) -> Record {
    record(name, ttl, RData::AAAA(rdata::AAAA(addr)))
}

/// Builds a text (`TXT`) record with a single character string.
pub fn txt(name: &Name, text: &str, ttl: u32) -> Record {
    record(name, ttl, RData::TXT(rdata::TXT::new(vec![text.to_owned()])))
}

/// Builds a mail exchange (`MX`) record. Lower preference values are
/// higher priority.
pub fn mx(name: &Name, exchange: &Name, preference: u16, ttl: u32) -> Record {
    record(
        name,
        ttl,
        RData::MX(rdata::MX::new(preference, exchange.to_wire())),
    )
}

/// Builds a name server (`NS`) record.
pub fn ns(name: &Name, nsdname: &Name, ttl: u32) -> Record {
    record(name, ttl, RData::NS(rdata::NS(nsdname.to_wire())))
}

/// Builds a canonical name (`CNAME`) record.
pub fn cname(name: &Name, target: &Name, ttl: u32) -> Record {
    record(name, ttl, RData::CNAME(rdata::CNAME(target.to_wire())))
}

/// Builds a pointer (`PTR`) record.
pub fn ptr(name: &Name, target: &Name, ttl: u32) -> Record {
    record(name, ttl, RData::PTR(rdata::PTR(target.to_wire())))
}

/// Builds a service locator (`SRV`) record.
pub fn srv(name: &Name, priority: u16, weight: u16, port: u16, target: &Name, ttl: u32) -> Record {
    record(
        name,
        ttl,
        RData::SRV(rdata::SRV::new(priority, weight, port, target.to_wire())),
    )
}

/// Builds a start-of-authority (`SOA`) record.
#[allow(clippy::too_many_arguments)]
pub fn soa(
    name: &Name,
    mname: &Name,
    rname: &Name,
    serial: u32,
    refresh: i32,
    retry: i32,
    expire: i32,
    minimum: u32,
    ttl: u32,
) -> Record {
    record(
        name,
        ttl,
        RData::SOA(rdata::SOA::new(
            mname.to_wire(),
            rname.to_wire(),
            serial,
            refresh,
            retry,
            expire,
            minimum,
        )),
    )
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use hickory_proto::rr::RecordType;

    use super::*;

    #[test]
    fn a_records_carry_the_address() {
        let name: Name = "example.com".parse().unwrap();
        let record = a(&name, Ipv4Addr::new(1, 2, 3, 4), 300);
        assert_eq!(record.record_type(), RecordType::A);
        assert_eq!(record.ttl(), 300);
        assert_eq!(record.dns_class(), DNSClass::IN);
        match record.data() {
            Some(RData::A(a)) => assert_eq!(a.0, Ipv4Addr::new(1, 2, 3, 4)),
            other => panic!("unexpected rdata {other:?}"),
        }
    }

    #[test]
    fn txt_records_carry_the_text() {
        let name: Name = "example.com".parse().unwrap();
        let record = txt(&name, "hello", 60);
        assert_eq!(record.record_type(), RecordType::TXT);
        match record.data() {
            Some(RData::TXT(data)) => assert_eq!(
                data.txt_data().first().map(AsRef::as_ref),
                Some(b"hello".as_slice()),
            ),
            other => panic!("unexpected rdata {other:?}"),
        }
    }

    #[test]
    fn mx_records_carry_preference_and_exchange() {
        let name: Name = "example.com".parse().unwrap();
        let exchange: Name = "mail.example.com".parse().unwrap();
        let record = mx(&name, &exchange, 10, 300);
        match record.data() {
            Some(RData::MX(data)) => {
                assert_eq!(data.preference(), 10);
                assert_eq!(data.exchange(), &exchange.to_wire());
            }
            other => panic!("unexpected rdata {other:?}"),
        }
    }
}
