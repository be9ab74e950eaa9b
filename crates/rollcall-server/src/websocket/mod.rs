//! WebSocket connection management, heartbeat, frame dispatch and broadcasting.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
