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

//! Network transports.
//!
//! The transports bind sockets and feed received messages to a frozen
//! [`Engine`](crate::server::Engine); the engine is what actually
//! parses, routes, and answers. Both transports run on the Tokio
//! runtime and share a worker [`Semaphore`](tokio::sync::Semaphore)
//! that bounds how many requests are processed concurrently.

// NOTE: In the transports, I/O error handling is generally to exit the
// serve loop, which the supervisor in each provider's `run` restarts
// after a short delay; this prevents an operation that repeatedly
// fails from using up all CPU time. Errors on individual sends and on
// established connections are logged and do not stop the loop.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::sync::{broadcast, mpsc};
use tokio::task;
use tokio::time::timeout;

use crate::server::Engine;

mod tcp;
mod udp;

pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// How long to wait before restarting a serve loop that failed. This
/// keeps a loop that crashes immediately from spinning.
pub(crate) const RESTART_DELAY: Duration = Duration::from_secs(1);

////////////////////////////////////////////////////////////////////////
// SHUTDOWN PLUMBING                                                  //
////////////////////////////////////////////////////////////////////////

/// Controls the shutdown of running transports.
///
/// Dropping the controller also triggers shutdown, but does not wait
/// for it to complete; use [`ShutdownController::shut_down`] for an
/// orderly stop.
#[must_use]
pub struct ShutdownController {
    request_sender: broadcast::Sender<()>,
    wait_receiver: mpsc::Receiver<()>,
}

impl ShutdownController {
    /// Requests that running transports shut down, then waits for
    /// them to finish.
    pub async fn shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.recv().await;
    }
}

/// A handle held by transport tasks to interact with the shutdown
/// mechanism.
///
/// The handle has two roles. Its `request_receiver` reports a shutdown
/// request when all senders have been dropped; and holding its
/// `wait_sender` prevents [`ShutdownController::shut_down`] from
/// returning until the handle is dropped.
pub struct ShutdownHandle {
    pub(crate) request_receiver: broadcast::Receiver<()>,
    wait_sender: mpsc::Sender<()>,
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        // A receiver created through resubscribe misses values already
        // queued, but the shutdown signal is not a value being sent:
        // it is all senders being dropped.
        Self {
            request_receiver: self.request_receiver.resubscribe(),
            wait_sender: self.wait_sender.clone(),
        }
    }
}

/// Produces a [`ShutdownController`] and an initial [`ShutdownHandle`]
/// connected to it.
pub fn shutdown_channels() -> (ShutdownController, ShutdownHandle) {
    let (request_sender, request_receiver) = broadcast::channel(1);
    let (wait_sender, wait_receiver) = mpsc::channel(1);
    let controller = ShutdownController {
        request_sender,
        wait_receiver,
    };
    let handle = ShutdownHandle {
        request_receiver,
        wait_sender,
    };
    (controller, handle)
}

/// Logs an I/O error from a transport task.
pub(crate) fn log_io_error(context: &str, error: std::io::Error) {
    error!("I/O error in {context}: {error}");
}

////////////////////////////////////////////////////////////////////////
// REQUEST DISPATCH                                                   //
////////////////////////////////////////////////////////////////////////

/// Runs one message through the engine on the blocking pool, honoring
/// the per-request deadline if one is configured.
pub(crate) async fn dispatch(
    engine: &Arc<Engine>,
    received: Vec<u8>,
    reply_limit: usize,
    request_timeout: Option<Duration>,
) -> Option<Vec<u8>> {
    let worker = {
        let engine = engine.clone();
        let received = received.clone();
        task::spawn_blocking(move || engine.handle_message(&received, reply_limit))
    };
    let outcome = match request_timeout {
        Some(deadline) => match timeout(deadline, worker).await {
            Ok(joined) => joined,
            Err(_) => {
                // The handler is never aborted mid-step; its eventual
                // result is simply discarded.
                debug!("request deadline passed; cancelling");
                return engine.cancelled_reply(&received, reply_limit);
            }
        },
        None => worker.await,
    };
    match outcome {
        Ok(reply) => reply,
        Err(e) => {
            debug!("request task failed: {e}");
            None
        }
    }
}
