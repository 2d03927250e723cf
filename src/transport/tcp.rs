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

//! The TCP transport.
//!
//! Messages are framed with a 16-bit big-endian length prefix
//! ([RFC 1035 § 4.2.2]). A connection may pipeline: the reader accepts
//! the next frame as soon as the previous one has been read, without
//! waiting for in-flight requests to finish. Replies are written in
//! completion order by a connection-local writer task, which is the
//! only task that touches the write half, so concurrent requests
//! multiplex cleanly onto one connection.
//!
//! [RFC 1035 § 4.2.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.2.2

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

use super::{dispatch, log_io_error, ShutdownHandle, RESTART_DELAY};
use crate::server::Engine;
use crate::settings::Settings;

/// The most unwritten replies a connection may queue before dispatched
/// tasks start waiting on the writer.
const WRITE_QUEUE_DEPTH: usize = 32;

/// A DNS message is at least a header; anything shorter is a broken
/// peer.
const MIN_MESSAGE_SIZE: usize = 12;

/// The TCP transport: an accept loop, and per connection a reader, a
/// writer, and one dispatched task per request.
pub struct TcpTransport {
    listener: TcpListener,
    engine: Arc<Engine>,
    workers: Arc<Semaphore>,
    read_timeout: Duration,
    idle_timeout: Duration,
    request_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Binds a TCP listener in preparation, without starting to serve.
    pub async fn bind(
        addr: SocketAddr,
        engine: Arc<Engine>,
        workers: Arc<Semaphore>,
        settings: &Settings,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("TCP transport bound to {}", listener.local_addr()?);
        Ok(Self {
            listener,
            engine,
            workers,
            read_timeout: settings.tcp_read_timeout,
            idle_timeout: settings.tcp_idle_timeout,
            request_timeout: settings.request_timeout,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until shutdown is requested. The accept loop restarts
    /// after a delay if it fails.
    pub async fn run(self, mut shutdown: ShutdownHandle) {
        loop {
            let accepting = self.accept_loop(shutdown.clone());
            tokio::select! {
                _ = shutdown.request_receiver.recv() => return,
                result = accepting => {
                    if let Err(e) = result {
                        log_io_error("TCP accept loop", e);
                    }
                }
            }
            tokio::select! {
                _ = shutdown.request_receiver.recv() => return,
                _ = tokio::time::sleep(RESTART_DELAY) => (),
            }
        }
    }

    async fn accept_loop(&self, shutdown: ShutdownHandle) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("accepted TCP connection from {peer}");
            let connection = Connection {
                engine: self.engine.clone(),
                workers: self.workers.clone(),
                read_timeout: self.read_timeout,
                idle_timeout: self.idle_timeout,
                request_timeout: self.request_timeout,
            };
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                connection.serve(stream, peer, shutdown).await;
            });
        }
    }
}

/// The state shared by the tasks serving one connection.
struct Connection {
    engine: Arc<Engine>,
    workers: Arc<Semaphore>,
    read_timeout: Duration,
    idle_timeout: Duration,
    request_timeout: Option<Duration>,
}

impl Connection {
    async fn serve(self, stream: TcpStream, peer: SocketAddr, shutdown: ShutdownHandle) {
        let (read_half, write_half) = stream.into_split();
        let (reply_sender, reply_receiver) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE_DEPTH);

        // Replies are serialized through a single writer task, so
        // concurrently completing requests cannot interleave frames.
        let writer = tokio::spawn(write_replies(write_half, reply_receiver, peer));

        self.read_requests(read_half, peer, reply_sender, shutdown)
            .await;

        // The reader is done; once the in-flight dispatch tasks drop
        // their senders, the writer drains and exits. If the peer is
        // fully gone the writes fail, and the replies are discarded
        // with it.
        if let Err(e) = writer.await {
            debug!("writer task for {peer} failed: {e}");
        }
        debug!("closed TCP connection from {peer}");
    }

    async fn read_requests(
        &self,
        mut read_half: OwnedReadHalf,
        peer: SocketAddr,
        reply_sender: mpsc::Sender<Vec<u8>>,
        mut shutdown: ShutdownHandle,
    ) {
        loop {
            // Wait up to the idle timeout for the next frame to begin.
            let mut len_buf = [0; 2];
            let first = tokio::select! {
                _ = shutdown.request_receiver.recv() => return,
                result = timeout(self.idle_timeout, read_half.read_exact(&mut len_buf)) => result,
            };
            match first {
                Ok(Ok(_)) => (),
                Ok(Err(e)) => {
                    if e.kind() != io::ErrorKind::UnexpectedEof {
                        debug!("error reading frame length from {peer}: {e}");
                    }
                    return;
                }
                Err(_) => {
                    debug!("closing idle connection from {peer}");
                    return;
                }
            }

            let len = u16::from_be_bytes(len_buf) as usize;
            if len < MIN_MESSAGE_SIZE {
                debug!("undersized frame ({len} bytes) from {peer}; closing");
                return;
            }

            // The peer has started a frame; it gets the (shorter) read
            // timeout to finish it.
            let mut body = vec![0; len];
            match timeout(self.read_timeout, read_half.read_exact(&mut body)).await {
                Ok(Ok(_)) => (),
                Ok(Err(e)) => {
                    debug!("error reading frame body from {peer}: {e}");
                    return;
                }
                Err(_) => {
                    debug!("frame read from {peer} timed out; closing");
                    return;
                }
            }

            // Dispatch without waiting for the result: the next frame
            // is accepted as soon as it arrives, and this request's
            // reply is written whenever it completes.
            let engine = self.engine.clone();
            let workers = self.workers.clone();
            let reply_sender = reply_sender.clone();
            let request_timeout = self.request_timeout;
            tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                let reply =
                    dispatch(&engine, body, u16::MAX as usize, request_timeout).await;
                if let Some(reply) = reply {
                    // A closed channel means the connection is gone;
                    // the reply is discarded, per the dropped-
                    // connection contract.
                    let _ = reply_sender.send(reply).await;
                }
            });
        }
    }
}

/// The connection-local writer: frames and writes replies in the order
/// they complete.
async fn write_replies(
    mut write_half: OwnedWriteHalf,
    mut replies: mpsc::Receiver<Vec<u8>>,
    peer: SocketAddr,
) {
    while let Some(reply) = replies.recv().await {
        let len = match u16::try_from(reply.len()) {
            Ok(len) => len,
            Err(_) => {
                debug!("reply to {peer} exceeds the frame limit; dropping");
                continue;
            }
        };
        let write = async {
            write_half.write_all(&len.to_be_bytes()).await?;
            write_half.write_all(&reply).await?;
            write_half.flush().await
        };
        if let Err(e) = write.await {
            // The peer dropped the connection; in-flight replies are
            // discarded and the error stops here.
            debug!("error writing reply to {peer}: {e}");
            return;
        }
    }
}
