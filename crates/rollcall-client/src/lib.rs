//! # rollcall-client
//!
//! WebSocket client for the rollcall dice protocol.
//!
//! - **Client**: `DiceClient` with connect/disconnect, fire-and-forget and await-style roll requests
//! - **Correlator**: pending request table; every request settles exactly once
//! - **Events**: `ClientEvent` published through the shared `EventDispatcher`

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod correlator;
pub mod errors;
pub mod events;
pub mod outbound;

pub use client::DiceClient;
pub use config::ClientConfig;
pub use correlator::PendingRoll;
pub use errors::ClientError;
pub use events::{ClientEvent, ClientEventKind};
