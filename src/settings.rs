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

//! Server settings.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Indicates the transport a server listens on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// The recognized server options, applied before the server starts.
#[derive(Clone, Debug)]
pub struct Settings {
    /// The address to bind. Host names are resolved at bind time.
    pub address: String,

    /// The port to bind.
    pub port: u16,

    /// The transport to serve.
    pub transport: Transport,

    /// How long a TCP peer may take to finish sending a frame once it
    /// has started.
    pub tcp_read_timeout: Duration,

    /// How long a TCP connection may sit idle between frames before it
    /// is closed.
    pub tcp_idle_timeout: Duration,

    /// The number of requests processed concurrently. The default of
    /// one gives deterministic handler semantics; raise it to let
    /// pipelined or parallel requests overlap.
    pub worker_count: usize,

    /// The largest reply sent over UDP before truncation applies.
    pub udp_max_message_bytes: usize,

    /// Whether rules registered through the pattern-string shorthand
    /// match names case-sensitively.
    pub case_sensitive_default: bool,

    /// An optional deadline for each request. A request past its
    /// deadline is cancelled: its reply is dropped unless a raw
    /// exception handler for `Cancelled` produces one.
    pub request_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: "localhost".to_owned(),
            port: 9953,
            transport: Transport::Udp,
            tcp_read_timeout: Duration::from_secs(5),
            tcp_idle_timeout: Duration::from_secs(30),
            worker_count: 1,
            udp_max_message_bytes: 512,
            case_sensitive_default: false,
            request_timeout: None,
        }
    }
}

impl Settings {
    /// Resolves the configured bind address.
    pub fn bind_addr(&self) -> io::Result<SocketAddr> {
        (self.address.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} did not resolve to any address", self.address),
                )
            })
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.address, "localhost");
        assert_eq!(settings.port, 9953);
        assert_eq!(settings.transport, Transport::Udp);
        assert_eq!(settings.worker_count, 1);
        assert_eq!(settings.udp_max_message_bytes, 512);
        assert_eq!(settings.tcp_read_timeout, Duration::from_secs(5));
        assert_eq!(settings.tcp_idle_timeout, Duration::from_secs(30));
        assert!(!settings.case_sensitive_default);
        assert!(settings.request_timeout.is_none());
    }

    #[test]
    fn bind_addr_resolves_localhost() {
        let settings = Settings::default();
        let addr = settings.bind_addr().unwrap();
        assert_eq!(addr.port(), 9953);
    }
}
