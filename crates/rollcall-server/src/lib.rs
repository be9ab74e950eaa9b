//! # rollcall-server
//!
//! Axum WebSocket server answering dice roll requests.
//!
//! - **Server**: `DiceServer` with open/close, roll responses and supported-dice broadcast
//! - **WebSocket**: connection registry, per-connection sessions, frame dispatch, heartbeat sweeps
//! - **Events**: `ServerEvent` published through the shared `EventDispatcher`
//! - **Config**: JSON file + `ROLLCALL_*` environment layering
//! - **Health**: `GET /health`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod events;
pub mod health;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{ServerConfig, load_config_from_path};
pub use errors::ServerError;
pub use events::{ServerEvent, ServerEventKind};
pub use server::DiceServer;
