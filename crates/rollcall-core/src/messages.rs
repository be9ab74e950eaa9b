//! Wire envelopes, discriminated by their `type` field.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::CodecError;
use crate::ids::RequestId;
use crate::types::{CompletedRollDescriptor, RollDescriptor, SupportedDice};

/// A message type that can travel over the wire in one direction.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Tags this direction accepts.
    const TYPES: &'static [&'static str];

    /// The tag of this message.
    fn type_name(&self) -> &'static str;

    /// Check invariants serde cannot express.
    fn validate(&self) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Messages sent by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Protocol version, sent first on every connection.
    ServerVersion {
        /// Announced protocol version.
        version: u32,
    },
    /// Current supported dice; sent at connect time and on every change.
    SupportedDice {
        /// Advertised dice.
        dice: SupportedDice,
    },
    /// Results for a request the client issued.
    RollResponse {
        /// Correlation identity of the request.
        id: RequestId,
        /// One completed descriptor per requested descriptor.
        rolls: Vec<CompletedRollDescriptor>,
    },
    /// Liveness check.
    Ping,
    /// Liveness acknowledgment.
    Pong,
}

impl WireMessage for ServerMessage {
    const TYPES: &'static [&'static str] =
        &["ServerVersion", "SupportedDice", "RollResponse", "Ping", "Pong"];

    fn type_name(&self) -> &'static str {
        match self {
            Self::ServerVersion { .. } => "ServerVersion",
            Self::SupportedDice { .. } => "SupportedDice",
            Self::RollResponse { .. } => "RollResponse",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
        }
    }

    fn validate(&self) -> Result<(), CodecError> {
        match self {
            Self::RollResponse { rolls, .. } => rolls.iter().try_for_each(CompletedRollDescriptor::validate),
            _ => Ok(()),
        }
    }
}

/// Messages sent by the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Ask the server to roll a batch of dice.
    RollRequest {
        /// Correlation identity drawn by the client.
        id: RequestId,
        /// Descriptors in request order.
        rolls: Vec<RollDescriptor>,
    },
    /// Withdraw an earlier request. Not acknowledged.
    CancelRollRequest {
        /// Identity of the request to withdraw.
        id: RequestId,
    },
    /// Liveness check.
    Ping,
    /// Liveness acknowledgment.
    Pong,
}

impl WireMessage for ClientMessage {
    const TYPES: &'static [&'static str] = &["RollRequest", "CancelRollRequest", "Ping", "Pong"];

    fn type_name(&self) -> &'static str {
        match self {
            Self::RollRequest { .. } => "RollRequest",
            Self::CancelRollRequest { .. } => "CancelRollRequest",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
        }
    }

    fn validate(&self) -> Result<(), CodecError> {
        match self {
            Self::RollRequest { rolls, .. } => rolls.iter().try_for_each(RollDescriptor::validate),
            _ => Ok(()),
        }
    }
}
