//! Outbound frame slot for the current connection.
//!
//! The queue is unbounded: every frame handed over while a link is attached
//! reaches the writer task.

use parking_lot::Mutex;
use rollcall_core::messages::WireMessage;
use rollcall_core::{ClientMessage, codec};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Queue into the writer task of the live connection, if any.
#[derive(Default)]
pub struct Outbound {
    slot: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Outbound {
    /// Create a detached slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route subsequent sends to `tx`.
    pub fn attach(&self, tx: mpsc::UnboundedSender<String>) {
        *self.slot.lock() = Some(tx);
    }

    /// Stop routing sends. Returns whether a queue was attached.
    pub fn detach(&self) -> bool {
        self.slot.lock().take().is_some()
    }

    /// Whether a queue is attached.
    pub fn is_attached(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Encode and queue a message.
    ///
    /// Returns `false` only when no link is attached or the writer task has
    /// already exited.
    pub fn send(&self, message: &ClientMessage) -> bool {
        let Some(tx) = self.slot.lock().clone() else {
            debug!(message = message.type_name(), "not connected, dropping message");
            return false;
        };
        let json = match codec::encode(message) {
            Ok(j) => j,
            Err(e) => {
                warn!(message = message.type_name(), error = %e, "failed to encode message");
                return false;
            }
        };
        if tx.send(json).is_err() {
            debug!(message = message.type_name(), "writer gone, dropping message");
            return false;
        }
        true
    }
}
