//! WebSocket session lifecycle. Handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use rollcall_core::{DiceError, protocol};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::handler::handle_frame;
use crate::events::ServerEvent;
use crate::server::ServerShared;

/// How long the writer gets to flush and close after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection with the greeting queued ahead of anything else
/// 2. Fires `ConnectionOpened`
/// 3. Forwards queued outbound frames to the socket
/// 4. Dispatches inbound text (and UTF-8 binary) frames
/// 5. Ends on close frame, transport error, termination or shutdown, then
///    unregisters
#[instrument(skip_all, fields(connection_id))]
pub async fn run_ws_session(ws: WebSocket, shared: Arc<ServerShared>, shutdown: CancellationToken) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(shared.config.send_queue_capacity.max(2));

    let registered = {
        let dice = shared.supported_dice.read();
        shared.registry.register(send_tx, &protocol::greeting(&dice))
    };
    let connection = match registered {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "could not assign a connection identity");
            let _ = ws_tx.close().await;
            return;
        }
    };
    let connection_id = connection.id.clone();
    let _ = tracing::Span::current().record("connection_id", connection_id.as_str());
    info!("client connected");
    let _ = shared.events.emit(&ServerEvent::ConnectionOpened {
        connection_id: connection_id.clone(),
    });

    let terminate = connection.termination_token();
    let writer_stop = terminate.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.as_str().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_stop.cancelled() => break,
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let frame = tokio::select! {
            () = terminate.cancelled() => {
                debug!("connection terminated");
                break;
            }
            () = shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            frame = ws_rx.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => handle_frame(text.as_str(), &connection, &shared.events),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => handle_frame(text, &connection, &shared.events),
                Err(_) => info!(len = data.len(), "received non-UTF8 binary frame"),
            },
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                break;
            }
            // Transport-level ping/pong is answered by the socket itself
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                warn!(error = %e, "websocket transport error");
                let _ = shared.events.emit(&ServerEvent::error(
                    Some(connection_id.clone()),
                    DiceError::Transport(e.to_string()),
                ));
                break;
            }
            None => break,
        }
    }

    connection.terminate();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(age_ms = connection.age().as_millis(), "client disconnected");
    let _ = shared.registry.unregister(&connection_id);
}
