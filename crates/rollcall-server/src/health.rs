//! `GET /health` body.

use std::time::Instant;

use rollcall_core::SupportedDice;
use rollcall_core::protocol::PROTOCOL_VERSION;
use serde::Serialize;

/// Liveness report for load balancers and humans.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` whenever the listener answers.
    pub status: &'static str,
    /// Seconds since the server handle was created.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Version announced in every greeting.
    pub protocol_version: u32,
    /// Dice currently advertised.
    pub supported_dice: SupportedDice,
}

/// Snapshot the server's counters.
pub fn health_check(started: Instant, connections: usize, supported_dice: SupportedDice) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: started.elapsed().as_secs(),
        connections,
        protocol_version: PROTOCOL_VERSION,
        supported_dice,
    }
}
