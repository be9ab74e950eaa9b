//! # rollcall-core
//!
//! Shared vocabulary for the rollcall dice protocol.
//!
//! - **Data model**: `RollDescriptor`, `CompletedRollDescriptor`, `SupportedDice`
//! - **Identities**: `ConnectionId`, `RequestId` newtypes and the collision-checked `IdGenerator`
//! - **Messages**: `ServerMessage` / `ClientMessage` envelopes tagged by `type`
//! - **Codec**: JSON text-frame encoding with direction-aware decoding
//! - **Protocol**: version announcement, version negotiation, connect-time greeting
//! - **Events**: `EventDispatcher` publish table composed into servers and clients
//! - **Errors**: `thiserror` hierarchy shared by both roles

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod protocol;
pub mod types;

pub use errors::{CodecError, DiceError, IdError, ProtocolError};
pub use events::{DispatchEvent, EventDispatcher, HandlerId};
pub use ids::{ConnectionId, IdGenerator, IdSource, RequestId};
pub use messages::{ClientMessage, ServerMessage};
pub use types::{CompletedRollDescriptor, RollDescriptor, RollOutcome, SupportedDice, SupportedDie};
