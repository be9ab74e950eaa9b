//! Connect-time version and capability negotiation.
//!
//! The server speaks first and unsolicited: `ServerVersion`, then
//! `SupportedDice`. Neither side waits for a round trip before sending
//! anything else.

use crate::errors::ProtocolError;
use crate::messages::ServerMessage;
use crate::types::SupportedDice;

/// Version the server announces.
pub const PROTOCOL_VERSION: u32 = 1;

/// Server versions the client accepts.
pub const SUPPORTED_SERVER_VERSIONS: &[u32] = &[1];

/// Frames the server queues on every new connection, in order.
pub fn greeting(dice: &SupportedDice) -> [ServerMessage; 2] {
    [
        ServerMessage::ServerVersion {
            version: PROTOCOL_VERSION,
        },
        ServerMessage::SupportedDice { dice: dice.clone() },
    ]
}

/// Check a server-announced version against [`SUPPORTED_SERVER_VERSIONS`].
pub fn negotiate(version: u32) -> Result<(), ProtocolError> {
    if SUPPORTED_SERVER_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(ProtocolError::UnsupportedVersion {
            version,
            supported: SUPPORTED_SERVER_VERSIONS,
        })
    }
}
