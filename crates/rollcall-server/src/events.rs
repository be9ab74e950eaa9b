//! Events the server publishes to its host.

use std::sync::Arc;

use rollcall_core::{ConnectionId, DiceError, DispatchEvent, RequestId, RollDescriptor};

/// Server lifecycle and request events.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer connected and was greeted.
    ConnectionOpened {
        /// Identity assigned to the connection.
        connection_id: ConnectionId,
    },
    /// A connection closed, locally or remotely. Requests it made will not be
    /// answerable any more.
    ConnectionClosed {
        /// Identity of the closed connection.
        connection_id: ConnectionId,
    },
    /// The server stopped listening.
    ServerClosed,
    /// A recoverable or transport error occurred.
    Error {
        /// Affected connection, when known.
        connection_id: Option<ConnectionId>,
        /// What went wrong.
        error: Arc<DiceError>,
    },
    /// A client asked for a batch of rolls.
    RollRequested {
        /// Connection to answer on.
        connection_id: ConnectionId,
        /// Identity to echo in the response.
        request_id: RequestId,
        /// Requested descriptors, in order.
        rolls: Vec<RollDescriptor>,
    },
    /// A client withdrew a request.
    RollCancelled {
        /// Connection that withdrew it.
        connection_id: ConnectionId,
        /// Identity of the withdrawn request.
        request_id: RequestId,
    },
}

/// Subscription keys for [`ServerEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    /// [`ServerEvent::ConnectionOpened`]
    ConnectionOpened,
    /// [`ServerEvent::ConnectionClosed`]
    ConnectionClosed,
    /// [`ServerEvent::ServerClosed`]
    ServerClosed,
    /// [`ServerEvent::Error`]
    Error,
    /// [`ServerEvent::RollRequested`]
    RollRequested,
    /// [`ServerEvent::RollCancelled`]
    RollCancelled,
}

impl DispatchEvent for ServerEvent {
    type Kind = ServerEventKind;

    fn kind(&self) -> ServerEventKind {
        match self {
            Self::ConnectionOpened { .. } => ServerEventKind::ConnectionOpened,
            Self::ConnectionClosed { .. } => ServerEventKind::ConnectionClosed,
            Self::ServerClosed => ServerEventKind::ServerClosed,
            Self::Error { .. } => ServerEventKind::Error,
            Self::RollRequested { .. } => ServerEventKind::RollRequested,
            Self::RollCancelled { .. } => ServerEventKind::RollCancelled,
        }
    }
}

impl ServerEvent {
    /// Build an error event.
    pub fn error(connection_id: Option<ConnectionId>, error: impl Into<DiceError>) -> Self {
        Self::Error {
            connection_id,
            error: Arc::new(error.into()),
        }
    }
}
