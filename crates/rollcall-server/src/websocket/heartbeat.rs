//! Heartbeat ping/pong liveness sweeps.
//!
//! Every interval the monitor walks the registry once. A connection that
//! answered the previous Ping has its alive flag cleared and gets a new Ping;
//! one that did not is terminated. A silent peer therefore survives between
//! one and two intervals.

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::ServerMessage;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::ConnectionRegistry;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections sent a fresh Ping.
    pub pinged: usize,
    /// Connections terminated for missing the previous Ping.
    pub terminated: usize,
}

/// Periodic liveness checker over every registered connection.
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor sweeping `registry` every `interval`.
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run a single sweep.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for conn in self.registry.snapshot() {
            if conn.take_alive() {
                let _ = conn.send_message(&ServerMessage::Ping);
                report.pinged += 1;
            } else {
                info!(connection_id = %conn.id, "heartbeat missed, terminating connection");
                conn.terminate();
                let _ = self.registry.unregister(&conn.id);
                report.terminated += 1;
            }
        }
        if report.pinged + report.terminated > 0 {
            debug!(pinged = report.pinged, terminated = report.terminated, "heartbeat sweep");
        }
        report
    }

    /// Sweep every interval until `cancel` fires. The first sweep happens one
    /// full interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.sweep();
                }
                () = cancel.cancelled() => {
                    debug!("heartbeat monitor stopped");
                    return;
                }
            }
        }
    }
}
