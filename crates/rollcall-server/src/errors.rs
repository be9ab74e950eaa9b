//! Server error types.

use rollcall_core::{CodecError, ConnectionId};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by [`DiceServer`](crate::server::DiceServer) operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or inspect the listening socket.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    /// `open` was called while the server is already listening.
    #[error("server is already open")]
    AlreadyOpen,

    /// A roll response failed validation and was not sent.
    #[error("invalid roll response: {0}")]
    InvalidResponse(#[source] CodecError),

    /// The connection is open but its send queue is full; the frame was dropped.
    #[error("send queue full for {connection_id}")]
    QueueFull {
        /// Connection whose queue is full.
        connection_id: ConnectionId,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
