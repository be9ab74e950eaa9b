//! `DiceServer`: Axum HTTP + WebSocket server answering roll requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{Json, Response};
use axum::routing::get;
use parking_lot::{Mutex, RwLock};
use rollcall_core::messages::WireMessage;
use rollcall_core::{
    CompletedRollDescriptor, ConnectionId, DiceError, EventDispatcher, HandlerId, RequestId, ServerMessage,
    SupportedDice,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::events::{ServerEvent, ServerEventKind};
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::heartbeat::HeartbeatMonitor;
use crate::websocket::registry::{ConnectionRegistry, Delivery};
use crate::websocket::session::run_ws_session;

/// State shared between the server handle, its sessions and its tasks.
pub struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) events: Arc<EventDispatcher<ServerEvent>>,
    pub(crate) registry: Arc<ConnectionRegistry>,
    /// Held for reading while a connection is greeted and registered, and
    /// for writing while a change is broadcast.
    pub(crate) supported_dice: RwLock<SupportedDice>,
    start_time: Instant,
    running: Mutex<Option<Running>>,
}

/// A live listener.
struct Running {
    local_addr: SocketAddr,
    shutdown: ShutdownCoordinator,
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    shared: Arc<ServerShared>,
    shutdown: CancellationToken,
}

/// The dice server. Cheap to clone; clones share one listener and one
/// connection table.
#[derive(Clone)]
pub struct DiceServer {
    shared: Arc<ServerShared>,
}

impl DiceServer {
    /// Create a closed server. Call [`open`](Self::open) to start listening.
    pub fn new(config: ServerConfig) -> Self {
        let events = Arc::new(EventDispatcher::new());
        let registry = Arc::new(ConnectionRegistry::new(events.clone()));
        let supported_dice = RwLock::new(config.supported_dice.clone());
        Self {
            shared: Arc::new(ServerShared {
                config,
                events,
                registry,
                supported_dice,
                start_time: Instant::now(),
                running: Mutex::new(None),
            }),
        }
    }

    /// Register an event handler.
    pub fn on<F>(&self, kind: ServerEventKind, handler: F) -> HandlerId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(kind, handler)
    }

    /// Remove an event handler.
    pub fn off(&self, id: HandlerId) -> bool {
        self.shared.events.off(id)
    }

    /// Bind the configured address and start serving.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// the port is `0`.
    pub async fn open(&self) -> Result<SocketAddr, ServerError> {
        if self.is_open() {
            return Err(ServerError::AlreadyOpen);
        }

        let listener = TcpListener::bind(self.shared.config.bind_target()).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = ShutdownCoordinator::new();

        let app = build_router(AppState {
            shared: self.shared.clone(),
            shutdown: shutdown.token(),
        });
        let serve_token = shutdown.token();
        let events = self.shared.events.clone();
        shutdown.track(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { serve_token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
                let _ = events.emit(&ServerEvent::error(None, DiceError::Transport(e.to_string())));
            }
        }));

        let monitor = HeartbeatMonitor::new(self.shared.registry.clone(), self.shared.config.heartbeat_interval());
        shutdown.track(tokio::spawn(monitor.run(shutdown.token())));

        {
            let mut running = self.shared.running.lock();
            if running.is_some() {
                shutdown.shutdown();
                return Err(ServerError::AlreadyOpen);
            }
            *running = Some(Running { local_addr, shutdown });
        }
        info!(%local_addr, heartbeat_ms = self.shared.config.heartbeat_interval_ms, "dice server listening");
        Ok(local_addr)
    }

    /// Stop listening, terminate every connection and fire `ServerClosed`.
    ///
    /// Closing a server that is not open does nothing.
    pub async fn close(&self) {
        let running = self.shared.running.lock().take();
        let Some(running) = running else {
            debug!("close on a server that is not open");
            return;
        };

        running.shutdown.shutdown();
        let terminated = self.shared.registry.clear();
        running
            .shutdown
            .graceful_shutdown(self.shared.config.shutdown_timeout())
            .await;
        info!(addr = %running.local_addr, terminated, "dice server closed");
        let _ = self.shared.events.emit(&ServerEvent::ServerClosed);
    }

    /// Answer a roll request on `connection_id`.
    ///
    /// Every descriptor must carry exactly `amount` outcomes. Returns
    /// `Ok(false)` when the connection is gone, and
    /// [`ServerError::QueueFull`] when it is open but the response was dropped.
    pub fn send_roll_response(
        &self,
        connection_id: &ConnectionId,
        request_id: RequestId,
        rolls: Vec<CompletedRollDescriptor>,
    ) -> Result<bool, ServerError> {
        let message = ServerMessage::RollResponse { id: request_id, rolls };
        message.validate().map_err(ServerError::InvalidResponse)?;
        match self.shared.registry.send_to(connection_id, &message) {
            Delivery::Queued => Ok(true),
            Delivery::Gone => Ok(false),
            Delivery::QueueFull => Err(ServerError::QueueFull {
                connection_id: connection_id.clone(),
            }),
        }
    }

    /// Replace the advertised dice and announce them to every connection.
    /// Returns the number of connections notified.
    pub fn set_supported_dice(&self, dice: SupportedDice) -> usize {
        let mut current = self.shared.supported_dice.write();
        current.clone_from(&dice);
        let recipients = self.shared.registry.broadcast(&ServerMessage::SupportedDice { dice });
        info!(dice = ?*current, recipients, "supported dice updated");
        recipients
    }

    /// Currently advertised dice.
    pub fn supported_dice(&self) -> SupportedDice {
        self.shared.supported_dice.read().clone()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Bound address while open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Whether the server is listening.
    pub fn is_open(&self) -> bool {
        self.shared.running.lock().is_some()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Build the Axum router with all routes.
    ///
    /// Sessions accepted through it end when the server closes.
    pub fn router(&self) -> Router {
        let shutdown = self
            .shared
            .running
            .lock()
            .as_ref()
            .map_or_else(CancellationToken::new, |r| r.shutdown.token());
        build_router(AppState {
            shared: self.shared.clone(),
            shutdown,
        })
    }
}

impl std::fmt::Debug for DiceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiceServer")
            .field("local_addr", &self.local_addr())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// GET / and GET /ws: WebSocket upgrade.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max = state.shared.config.max_message_size;
    ws.max_message_size(max)
        .on_upgrade(move |socket| run_ws_session(socket, state.shared, state.shutdown))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let dice = state.shared.supported_dice.read().clone();
    Json(health::health_check(state.shared.start_time, state.shared.registry.len(), dice))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    fn make_server() -> DiceServer {
        DiceServer::new(ServerConfig {
            port: 0,
            ..ServerConfig::default()
        })
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed.get("uptime_secs").is_some());
        assert_eq!(parsed["supported_dice"], serde_json::json!(["all"]));
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let server = make_server();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn open_twice_is_rejected() {
        let server = make_server();
        let addr = server.open().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert_matches!(server.open().await, Err(ServerError::AlreadyOpen));
        server.close().await;
        assert!(!server.is_open());
        assert_eq!(server.local_addr(), None);
    }

    #[tokio::test]
    async fn close_fires_server_closed_once() {
        let server = make_server();
        let closed = Arc::new(Mutex::new(0));
        let c = closed.clone();
        let _ = server.on(ServerEventKind::ServerClosed, move |_| *c.lock() += 1);

        let _ = server.open().await.unwrap();
        server.close().await;
        server.close().await;
        assert_eq!(*closed.lock(), 1);
    }

    #[tokio::test]
    async fn reopen_after_close() {
        let server = make_server();
        let _ = server.open().await.unwrap();
        server.close().await;
        let _ = server.open().await.unwrap();
        assert!(server.is_open());
        server.close().await;
    }

    #[test]
    fn send_roll_response_rejects_incomplete_descriptor() {
        let server = make_server();
        let rolls = vec![CompletedRollDescriptor {
            amount: 2,
            faces: 6,
            completed_rolls: vec![3],
        }];
        let result = server.send_roll_response(&ConnectionId::from("conn_x"), RequestId::from("r1"), rolls);
        assert_matches!(result, Err(ServerError::InvalidResponse(_)));
    }

    #[test]
    fn send_roll_response_to_missing_connection() {
        let server = make_server();
        let rolls = vec![CompletedRollDescriptor {
            amount: 1,
            faces: 6,
            completed_rolls: vec![4],
        }];
        let result = server.send_roll_response(&ConnectionId::from("conn_x"), RequestId::from("r1"), rolls);
        assert_matches!(result, Ok(false));
    }

    #[test]
    fn send_roll_response_reports_full_queue() {
        let server = make_server();
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let conn = server.shared.registry.register(tx, &[ServerMessage::Ping]).unwrap();
        let one_d6 = || {
            vec![CompletedRollDescriptor {
                amount: 1,
                faces: 6,
                completed_rolls: vec![2],
            }]
        };

        let result = server.send_roll_response(&conn.id, RequestId::from("r1"), one_d6());
        assert_matches!(result, Err(ServerError::QueueFull { connection_id }) if connection_id == conn.id);

        let _ = rx.try_recv().unwrap();
        assert_matches!(server.send_roll_response(&conn.id, RequestId::from("r2"), one_d6()), Ok(true));
        drop(rx);
        assert_matches!(server.send_roll_response(&conn.id, RequestId::from("r3"), one_d6()), Ok(false));
    }

    #[test]
    fn set_supported_dice_replaces_value() {
        let server = make_server();
        assert_eq!(server.supported_dice(), SupportedDice::all());
        assert_eq!(server.set_supported_dice(SupportedDice::faces([6, 20])), 0);
        assert_eq!(server.supported_dice(), SupportedDice::faces([6, 20]));
    }

    #[test]
    fn off_removes_handler() {
        let server = make_server();
        let id = server.on(ServerEventKind::ServerClosed, |_| {});
        assert!(server.off(id));
        assert!(!server.off(id));
    }
}
