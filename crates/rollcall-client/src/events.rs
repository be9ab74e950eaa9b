//! Events the client publishes to its host.

use std::sync::Arc;

use rollcall_core::{CompletedRollDescriptor, DiceError, DispatchEvent, RequestId, SupportedDice};

/// Client lifecycle and response events.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The connection is established.
    Opened,
    /// The server closed the connection or the transport failed. Not fired
    /// for a local `disconnect`.
    Closed,
    /// Something went wrong on the connection.
    Error {
        /// What went wrong.
        error: Arc<DiceError>,
    },
    /// A fire-and-forget request was answered.
    RollResponse {
        /// Identity returned by `request_roll`.
        request_id: RequestId,
        /// One completed descriptor per requested descriptor.
        rolls: Vec<CompletedRollDescriptor>,
    },
    /// The server announced its supported dice.
    SupportedDiceUpdated {
        /// New advertisement.
        dice: SupportedDice,
    },
    /// A fire-and-forget request was cancelled, locally or by timeout.
    RollCancelled {
        /// Identity of the cancelled request.
        request_id: RequestId,
    },
}

/// Subscription keys for [`ClientEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEventKind {
    /// [`ClientEvent::Opened`]
    Opened,
    /// [`ClientEvent::Closed`]
    Closed,
    /// [`ClientEvent::Error`]
    Error,
    /// [`ClientEvent::RollResponse`]
    RollResponse,
    /// [`ClientEvent::SupportedDiceUpdated`]
    SupportedDiceUpdated,
    /// [`ClientEvent::RollCancelled`]
    RollCancelled,
}

impl DispatchEvent for ClientEvent {
    type Kind = ClientEventKind;

    fn kind(&self) -> ClientEventKind {
        match self {
            Self::Opened => ClientEventKind::Opened,
            Self::Closed => ClientEventKind::Closed,
            Self::Error { .. } => ClientEventKind::Error,
            Self::RollResponse { .. } => ClientEventKind::RollResponse,
            Self::SupportedDiceUpdated { .. } => ClientEventKind::SupportedDiceUpdated,
            Self::RollCancelled { .. } => ClientEventKind::RollCancelled,
        }
    }
}

impl ClientEvent {
    /// Build an error event.
    pub fn error(error: impl Into<DiceError>) -> Self {
        Self::Error {
            error: Arc::new(error.into()),
        }
    }
}
