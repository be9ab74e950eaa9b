//! Error hierarchy shared by the server and client.
//!
//! - [`CodecError`]: a frame could not be turned into a typed message
//! - [`IdError`]: the identity generator gave up re-drawing
//! - [`ProtocolError`]: the peer speaks a protocol version we do not
//! - [`DiceError`]: umbrella carried by error events on either side

use thiserror::Error;

/// Failures while encoding or decoding a wire message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Not JSON, not an object, or fields that do not deserialize.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The envelope has no string `type` field.
    #[error("message has no type tag")]
    MissingType,

    /// A well-formed envelope whose tag is not valid in this direction.
    #[error("unrecognized message type `{0}`")]
    UnknownType(String),

    /// A descriptor violates its positivity or completeness invariant.
    #[error("invalid roll descriptor: {0}")]
    InvalidDescriptor(String),
}

impl CodecError {
    /// Whether the frame should be surfaced through the error event.
    ///
    /// Unknown tags are dropped quietly; everything else is reported.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::UnknownType(_))
    }
}

/// The identity generator could not find a free identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    /// Every draw collided with an identity already in use.
    #[error("no unused identity after {attempts} attempts")]
    Exhausted {
        /// Number of draws made.
        attempts: usize,
    },
}

/// Protocol-level incompatibility with the peer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The server announced a version this client does not speak.
    #[error("unsupported server version {version} (supported: {supported:?})")]
    UnsupportedVersion {
        /// Version announced by the server.
        version: u32,
        /// Versions this client accepts.
        supported: &'static [u32],
    },
}

/// Error payload delivered through the `Error` event of either role.
#[derive(Debug, Error)]
pub enum DiceError {
    /// An inbound frame failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Version negotiation failed; the connection is torn down.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The underlying socket reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}
