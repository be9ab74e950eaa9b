//! Client error types.

use rollcall_core::{CodecError, IdError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors returned by [`DiceClient`](crate::client::DiceClient) operations.
///
/// Failures after a connection is established are delivered through the
/// `Error` event instead.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket handshake failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] Box<tungstenite::Error>),

    /// A roll request must contain at least one descriptor.
    #[error("roll request has no descriptors")]
    EmptyRequest,

    /// A descriptor has a zero amount or face count.
    #[error(transparent)]
    InvalidDescriptor(#[from] CodecError),

    /// No unused request identity could be drawn.
    #[error(transparent)]
    Identity(#[from] IdError),
}

impl From<tungstenite::Error> for ClientError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Connect(Box::new(e))
    }
}
