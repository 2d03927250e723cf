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

//! The UDP transport.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;

use super::{dispatch, log_io_error, ShutdownHandle, RESTART_DELAY};
use crate::server::Engine;
use crate::settings::Settings;

/// The largest datagram the transport will accept. Datagrams are
/// accepted at full size regardless of the configured reply limit;
/// only replies are truncated.
const RECV_BUFFER_SIZE: usize = u16::MAX as usize;

/// The UDP transport: one socket, one receive loop, one dispatched
/// task per datagram.
///
/// No per-request state survives across datagrams. Each datagram's
/// task waits its turn on the shared worker semaphore, runs the engine
/// on the blocking pool (handlers are free to block), and sends the
/// reply back to the datagram's source.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    engine: Arc<Engine>,
    workers: Arc<Semaphore>,
    reply_limit: usize,
    request_timeout: Option<Duration>,
}

impl UdpTransport {
    /// Binds a UDP socket in preparation, without starting to serve.
    pub async fn bind(
        addr: SocketAddr,
        engine: Arc<Engine>,
        workers: Arc<Semaphore>,
        settings: &Settings,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("UDP transport bound to {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            engine,
            workers,
            reply_limit: settings.udp_max_message_bytes,
            request_timeout: settings.request_timeout,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serves until shutdown is requested. The receive loop restarts
    /// after a delay if it fails.
    pub async fn run(self, mut shutdown: ShutdownHandle) {
        loop {
            tokio::select! {
                _ = shutdown.request_receiver.recv() => return,
                result = self.serve_loop() => {
                    if let Err(e) = result {
                        log_io_error("UDP receive loop", e);
                    }
                }
            }
            tokio::select! {
                _ = shutdown.request_receiver.recv() => return,
                _ = tokio::time::sleep(RESTART_DELAY) => (),
            }
        }
    }

    async fn serve_loop(&self) -> io::Result<()> {
        let mut buf = vec![0; RECV_BUFFER_SIZE];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let received = buf[..len].to_vec();
            let socket = self.socket.clone();
            let engine = self.engine.clone();
            let workers = self.workers.clone();
            let reply_limit = self.reply_limit;
            let request_timeout = self.request_timeout;
            tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                let reply =
                    dispatch(&engine, received, reply_limit, request_timeout).await;
                if let Some(reply) = reply {
                    // A failed send should not take down the receive
                    // loop; log it and move on.
                    if let Err(e) = socket.send_to(&reply, peer).await {
                        log_io_error("UDP send", e);
                    }
                }
            });
        }
    }
}
