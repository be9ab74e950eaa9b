//! Per-connection state owned by the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rollcall_core::codec;
use rollcall_core::{ConnectionId, ServerMessage};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Why a frame was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The writer is alive but behind by a full queue.
    Full,
    /// The writer task has exited.
    Closed,
}

/// A connected WebSocket peer.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Cleared when a Ping goes out, set again when the Pong arrives.
    is_alive: AtomicBool,
    /// Fired to force the session to close its socket.
    terminate: CancellationToken,
    /// Count of frames dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a new connection, alive from the start.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            tx,
            connected_at: Instant::now(),
            is_alive: AtomicBool::new(true),
            terminate: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a text frame, counting it as dropped on failure.
    pub fn try_send(&self, frame: Arc<String>) -> Result<(), SendFailure> {
        self.tx.try_send(frame).map_err(|e| {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            match e {
                TrySendError::Full(_) => SendFailure::Full,
                TrySendError::Closed(_) => SendFailure::Closed,
            }
        })
    }

    /// Queue a text frame. Returns `false` if it was dropped.
    pub fn send(&self, frame: Arc<String>) -> bool {
        self.try_send(frame).is_ok()
    }

    /// Encode and queue a server message.
    pub fn try_send_message(&self, message: &ServerMessage) -> Result<(), SendFailure> {
        match codec::encode(message) {
            Ok(json) => self.try_send(Arc::new(json)),
            Err(e) => {
                warn!(connection_id = %self.id, error = %e, "failed to encode message");
                Err(SendFailure::Closed)
            }
        }
    }

    /// Encode and queue a server message. Returns `false` if it was dropped.
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        self.try_send_message(message).is_ok()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (Pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Current value of the alive flag.
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Clear the alive flag ahead of a Ping.
    ///
    /// Returns whether the connection had answered since the last sweep.
    pub fn take_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Ask the session task to close this connection's socket.
    pub fn terminate(&self) {
        self.terminate.cancel();
    }

    /// Whether termination has been requested.
    pub fn is_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Token the session task watches for termination.
    pub fn termination_token(&self) -> CancellationToken {
        self.terminate.clone()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("is_alive", &self.is_alive())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}
