//! `DiceClient`: thin client over `tokio-tungstenite`.
//!
//! One reader and one writer task run per connection. Frames are decoded
//! and dispatched on the reader task; event handlers therefore run there and
//! may call back into the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rollcall_core::{
    ClientMessage, CodecError, DiceError, EventDispatcher, HandlerId, RequestId, RollDescriptor, ServerMessage,
    SupportedDice, codec, protocol,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::correlator::{Continuation, PendingRoll, RequestCorrelator};
use crate::errors::ClientError;
use crate::events::{ClientEvent, ClientEventKind};
use crate::outbound::Outbound;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long [`DiceClient::close`] waits for the close frame to be flushed.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// What the reader does after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameAction {
    Continue,
    Disconnect,
}

/// The live connection.
struct Link {
    generation: u64,
    stop: CancellationToken,
    writer: Option<JoinHandle<()>>,
}

struct ClientInner {
    config: ClientConfig,
    events: Arc<EventDispatcher<ClientEvent>>,
    outbound: Arc<Outbound>,
    correlator: RequestCorrelator,
    supported_dice: RwLock<Option<SupportedDice>>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
}

/// A dice client. Cheap to clone; clones share one connection and one
/// pending request table.
#[derive(Clone)]
pub struct DiceClient {
    inner: Arc<ClientInner>,
}

impl DiceClient {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        let events = Arc::new(EventDispatcher::new());
        let outbound = Arc::new(Outbound::new());
        let correlator = RequestCorrelator::new(outbound.clone(), events.clone());
        Self {
            inner: Arc::new(ClientInner {
                config,
                events,
                outbound,
                correlator,
                supported_dice: RwLock::new(None),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Register an event handler.
    pub fn on<F>(&self, kind: ClientEventKind, handler: F) -> HandlerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Remove an event handler.
    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    /// Connect to `url`, replacing any existing connection.
    ///
    /// Fires `Opened` before any server frame is processed.
    pub async fn connect(&self, url: &str) -> Result<(), ClientError> {
        self.disconnect();

        let (ws, _) = connect_async(url).await?;
        let (ws_tx, ws_rx) = ws.split();
        let (send_tx, send_rx) = mpsc::unbounded_channel::<String>();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let stop = CancellationToken::new();
        let writer = tokio::spawn(writer_loop(ws_tx, send_rx, stop.clone()));

        {
            let mut link = self.inner.link.lock();
            if let Some(previous) = link.take() {
                previous.stop.cancel();
            }
            *link = Some(Link {
                generation,
                stop: stop.clone(),
                writer: Some(writer),
            });
        }
        self.inner.outbound.attach(send_tx);
        info!(url, generation, "connected");

        let _ = self.inner.events.emit(&ClientEvent::Opened);
        let _reader = tokio::spawn(reader_loop(self.inner.clone(), ws_rx, generation, stop));
        Ok(())
    }

    /// Close the connection locally.
    ///
    /// Does not fire `Closed`. Pending requests are cancelled without
    /// contacting the server.
    pub fn disconnect(&self) {
        let _ = self.inner.teardown(None);
    }

    /// Like [`disconnect`](Self::disconnect), but waits until frames already
    /// queued and the close frame have been written to the socket.
    pub async fn close(&self) {
        let Some(writer) = self.inner.teardown(None).and_then(|link| link.writer) else {
            return;
        };
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
            warn!("close frame not flushed in time");
        }
    }

    /// Request a batch of rolls; the result arrives as a `RollResponse` event.
    pub fn request_roll(&self, rolls: Vec<RollDescriptor>) -> Result<RequestId, ClientError> {
        let id = self.inner.correlator.issue(rolls, Continuation::Detached)?;
        self.arm_timeout(&id);
        Ok(id)
    }

    /// Request a batch of rolls and get a future for the outcome.
    pub fn request_roll_await(&self, rolls: Vec<RollDescriptor>) -> Result<(RequestId, PendingRoll), ClientError> {
        let (continuation, pending) = Continuation::awaiting();
        let id = self.inner.correlator.issue(rolls, continuation)?;
        self.arm_timeout(&id);
        Ok((id, pending))
    }

    /// Withdraw a pending request. Returns `false` if it was not pending.
    pub fn cancel_roll_request(&self, id: &RequestId) -> bool {
        self.inner.correlator.cancel(id)
    }

    /// Dice most recently announced by the server.
    pub fn supported_dice(&self) -> Option<SupportedDice> {
        self.inner.supported_dice.read().clone()
    }

    /// Whether a connection is live.
    pub fn is_connected(&self) -> bool {
        self.inner.outbound.is_attached()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    fn arm_timeout(&self, id: &RequestId) {
        let Some(timeout) = self.inner.config.request_timeout() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(request_id = %id, "no runtime for request timeout, waiting indefinitely");
            return;
        };
        let inner = Arc::downgrade(&self.inner);
        let id = id.clone();
        let _timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = inner.upgrade() else { return };
            if inner.correlator.cancel(&id) {
                info!(request_id = %id, timeout_secs = timeout.as_secs(), "request timed out, cancelled");
            }
        });
    }

    #[cfg(test)]
    fn handle_frame(&self, text: &str) -> FrameAction {
        self.inner.handle_frame(text)
    }
}

impl std::fmt::Debug for DiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiceClient")
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    /// Tear down the link if it is still `generation` (`None` matches any).
    /// Returns the link that was torn down.
    fn teardown(&self, generation: Option<u64>) -> Option<Link> {
        let link = {
            let mut link = self.link.lock();
            match (&*link, generation) {
                (Some(current), Some(g)) if current.generation != g => return None,
                _ => link.take(),
            }
        }?;

        link.stop.cancel();
        let _ = self.outbound.detach();
        let _ = self.correlator.cancel_all_local();
        debug!(generation = link.generation, "connection torn down");
        Some(link)
    }

    fn handle_frame(&self, text: &str) -> FrameAction {
        let message = match codec::decode::<ServerMessage>(text) {
            Ok(m) => m,
            Err(e) if e.is_reportable() => {
                warn!(error = %e, "invalid message received");
                let rejected = matches!(e, CodecError::InvalidDescriptor(_))
                    .then(|| rejected_response_id(text))
                    .flatten();
                let _ = self.events.emit(&ClientEvent::error(e));
                if let Some(id) = rejected {
                    if self.correlator.abandon(&id) {
                        warn!(request_id = %id, "response failed validation, request cancelled");
                    }
                }
                return FrameAction::Continue;
            }
            Err(e) => {
                warn!(error = %e, "dropping message");
                return FrameAction::Continue;
            }
        };

        match message {
            ServerMessage::ServerVersion { version } => {
                if let Err(e) = protocol::negotiate(version) {
                    error!(error = %e, "closing connection");
                    let _ = self.events.emit(&ClientEvent::error(e));
                    return FrameAction::Disconnect;
                }
                debug!(version, "server version accepted");
            }
            ServerMessage::SupportedDice { dice } => {
                debug!(dice = ?dice, "supported dice updated");
                *self.supported_dice.write() = Some(dice.clone());
                let _ = self.events.emit(&ClientEvent::SupportedDiceUpdated { dice });
            }
            ServerMessage::RollResponse { id, rolls } => {
                let _ = self.correlator.resolve(&id, rolls);
            }
            ServerMessage::Ping => {
                let _ = self.outbound.send(&ClientMessage::Pong);
            }
            ServerMessage::Pong => {}
        }
        FrameAction::Continue
    }
}

/// Request identity of a `RollResponse` frame whose payload failed validation.
fn rejected_response_id(text: &str) -> Option<RequestId> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "RollResponse" {
        return None;
    }
    value.get("id")?.as_str().map(RequestId::from)
}

async fn writer_loop(
    mut ws_tx: futures::stream::SplitSink<WsStream, Message>,
    mut send_rx: mpsc::UnboundedReceiver<String>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            frame = send_rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            () = stop.cancelled() => {
                while let Ok(frame) = send_rx.try_recv() {
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = ws_tx.close().await;
}

async fn reader_loop(
    inner: Arc<ClientInner>,
    mut ws_rx: futures::stream::SplitStream<WsStream>,
    generation: u64,
    stop: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = stop.cancelled() => return,
            frame = ws_rx.next() => frame,
        };

        let action = match frame {
            Some(Ok(Message::Text(text))) => inner.handle_frame(text.as_str()),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => inner.handle_frame(text),
                Err(_) => {
                    debug!(len = data.len(), "received non-UTF8 binary frame");
                    FrameAction::Continue
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => FrameAction::Continue,
            Some(Err(e)) => {
                warn!(error = %e, "websocket transport error");
                let _ = inner.events.emit(&ClientEvent::error(DiceError::Transport(e.to_string())));
                break;
            }
        };

        if action == FrameAction::Disconnect {
            let _ = inner.teardown(Some(generation));
            return;
        }
    }

    if inner.teardown(Some(generation)).is_some() {
        info!("connection closed by server");
        let _ = inner.events.emit(&ClientEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use rollcall_core::{CodecError, ProtocolError, SupportedDie};

    use super::*;

    fn recorder(client: &DiceClient, kinds: &[ClientEventKind]) -> Arc<Mutex<Vec<ClientEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for &kind in kinds {
            let s = seen.clone();
            let _ = client.on(kind, move |e| s.lock().push(e.clone()));
        }
        seen
    }

    /// A client with an attached outbound queue but no socket.
    fn wired_client(config: ClientConfig) -> (DiceClient, mpsc::UnboundedReceiver<String>) {
        let client = DiceClient::new(config);
        let (tx, rx) = mpsc::unbounded_channel();
        client.inner.outbound.attach(tx);
        *client.inner.link.lock() = Some(Link {
            generation: 1,
            stop: CancellationToken::new(),
            writer: None,
        });
        (client, rx)
    }

    fn d6() -> Vec<RollDescriptor> {
        vec![RollDescriptor { amount: 2, faces: 6 }]
    }

    #[test]
    fn fresh_client_is_disconnected() {
        let client = DiceClient::new(ClientConfig::default());
        assert!(!client.is_connected());
        assert_eq!(client.supported_dice(), None);
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn supported_version_continues() {
        let (client, _rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::Error]);
        assert_eq!(
            client.handle_frame(r#"{"type":"ServerVersion","version":1}"#),
            FrameAction::Continue
        );
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn unsupported_version_reports_once_and_disconnects() {
        let (client, _rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::Error, ClientEventKind::Closed]);
        assert_eq!(
            client.handle_frame(r#"{"type":"ServerVersion","version":2}"#),
            FrameAction::Disconnect
        );
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_matches!(&seen[0], ClientEvent::Error { error } => {
            assert_matches!(
                **error,
                DiceError::Protocol(ProtocolError::UnsupportedVersion { version: 2, .. })
            );
        });
    }

    #[test]
    fn supported_dice_replaces_cache_each_time() {
        let (client, _rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::SupportedDiceUpdated]);
        let _ = client.handle_frame(r#"{"type":"SupportedDice","dice":["all"]}"#);
        let _ = client.handle_frame(r#"{"type":"SupportedDice","dice":[4,6,8,12,20,100]}"#);

        assert_eq!(client.supported_dice(), Some(SupportedDice::faces([4, 6, 8, 12, 20, 100])));
        assert_eq!(seen.lock().len(), 2);
        assert_matches!(&seen.lock()[0], ClientEvent::SupportedDiceUpdated { dice } => {
            assert_eq!(dice.as_slice(), &[SupportedDie::All]);
        });
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let (client, mut rx) = wired_client(ClientConfig::default());
        let _ = client.handle_frame(r#"{"type":"Ping"}"#);
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"Pong"}"#);
    }

    #[test]
    fn roll_response_resolves_detached_request() {
        let (client, _rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::RollResponse]);
        let id = client.request_roll(d6()).unwrap();

        let frame = serde_json::json!({
            "type": "RollResponse",
            "id": id.as_str(),
            "rolls": [{"amount": 2, "faces": 6, "completedRolls": [3, 5]}],
        });
        let _ = client.handle_frame(&frame.to_string());
        assert_eq!(client.pending_count(), 0);
        assert_matches!(&seen.lock()[0], ClientEvent::RollResponse { request_id, rolls } => {
            assert_eq!(request_id, &id);
            assert_eq!(rolls[0].completed_rolls, vec![3, 5]);
        });
    }

    #[test]
    fn response_for_unknown_id_is_dropped() {
        let (client, _rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::RollResponse, ClientEventKind::Error]);
        let _ = client.handle_frame(
            r#"{"type":"RollResponse","id":"nope","rolls":[{"amount":1,"faces":6,"completedRolls":[1]}]}"#,
        );
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn malformed_frame_reports_error() {
        let (client, _rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::Error]);
        assert_eq!(client.handle_frame("not json"), FrameAction::Continue);
        assert_matches!(&seen.lock()[0], ClientEvent::Error { error } => {
            assert_matches!(**error, DiceError::Codec(CodecError::Malformed(_)));
        });
    }

    #[test]
    fn client_bound_role_confusion_is_dropped() {
        let (client, _rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::Error]);
        let action = client.handle_frame(r#"{"type":"RollRequest","id":"x","rolls":[{"amount":1,"faces":6}]}"#);
        assert_eq!(action, FrameAction::Continue);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_without_closed() {
        let (client, mut rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::Closed, ClientEventKind::RollCancelled]);
        let (_, pending) = client.request_roll_await(d6()).unwrap();
        let detached = client.request_roll(d6()).unwrap();
        while rx.try_recv().is_ok() {}

        client.disconnect();
        assert!(!client.is_connected());
        assert!(pending.await.cancelled);
        assert_matches!(&seen.lock()[..], [ClientEvent::RollCancelled { request_id }] => {
            assert_eq!(request_id, &detached);
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stale_generation_teardown_is_ignored() {
        let (client, _rx) = wired_client(ClientConfig::default());
        assert!(client.inner.teardown(Some(7)).is_none());
        assert!(client.is_connected());
        assert!(client.inner.teardown(Some(1)).is_some());
        assert!(client.inner.teardown(Some(1)).is_none());
    }

    #[tokio::test]
    async fn close_waits_for_writer() {
        let (client, _rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::Closed]);
        let stop = CancellationToken::new();
        let flushed = Arc::new(AtomicU64::new(0));
        let (writer_stop, writer_flushed) = (stop.clone(), flushed.clone());
        *client.inner.link.lock() = Some(Link {
            generation: 2,
            stop,
            writer: Some(tokio::spawn(async move {
                writer_stop.cancelled().await;
                tokio::task::yield_now().await;
                let _ = writer_flushed.fetch_add(1, Ordering::SeqCst);
            })),
        });

        client.close().await;
        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        assert!(!client.is_connected());
        assert!(seen.lock().is_empty());
        client.close().await;
    }

    #[test]
    fn burst_of_requests_is_fully_queued() {
        let (client, mut rx) = wired_client(ClientConfig::default());
        let ids: Vec<RequestId> = (0..500).map(|_| client.request_roll(d6()).unwrap()).collect();

        let mut sent = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let frame: serde_json::Value = serde_json::from_str(&frame).unwrap();
            sent.push(RequestId::from(frame["id"].as_str().unwrap()));
        }
        assert_eq!(sent, ids);
    }

    #[tokio::test]
    async fn invalid_response_cancels_its_request() {
        let (client, _rx) = wired_client(ClientConfig::default());
        let seen = recorder(&client, &[ClientEventKind::Error]);
        let (id, pending) = client.request_roll_await(d6()).unwrap();
        let other = client.request_roll(d6()).unwrap();

        let frame = serde_json::json!({
            "type": "RollResponse",
            "id": id.as_str(),
            "rolls": [{"amount": 2, "faces": 6, "completedRolls": [4]}],
        });
        assert_eq!(client.handle_frame(&frame.to_string()), FrameAction::Continue);

        assert!(pending.await.cancelled);
        assert_eq!(client.pending_count(), 1);
        assert!(client.inner.correlator.is_pending(&other));
        assert_matches!(&seen.lock()[..], [ClientEvent::Error { error }] => {
            assert_matches!(**error, DiceError::Codec(CodecError::InvalidDescriptor(_)));
        });
    }

    #[test]
    fn rejected_id_only_for_responses() {
        assert_eq!(
            rejected_response_id(r#"{"type":"RollResponse","id":"r9","rolls":[]}"#),
            Some(RequestId::from("r9"))
        );
        assert_eq!(rejected_response_id(r#"{"type":"SupportedDice","id":"r9"}"#), None);
        assert_eq!(rejected_response_id(r#"{"type":"RollResponse","id":7}"#), None);
        assert_eq!(rejected_response_id("garbage"), None);
    }

    #[test]
    fn empty_request_rejected() {
        let client = DiceClient::new(ClientConfig::default());
        assert_matches!(client.request_roll(Vec::new()), Err(ClientError::EmptyRequest));
        assert_matches!(client.request_roll_await(Vec::new()), Err(ClientError::EmptyRequest));
    }

    #[test]
    fn request_while_disconnected_can_be_cancelled() {
        let client = DiceClient::new(ClientConfig::default());
        let id = client.request_roll(d6()).unwrap();
        assert_eq!(client.pending_count(), 1);
        assert!(client.cancel_roll_request(&id));
        assert!(!client.cancel_roll_request(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_cancels_and_notifies_server() {
        let (client, mut rx) = wired_client(ClientConfig {
            request_timeout_secs: Some(5),
        });
        let (id, pending) = client.request_roll_await(d6()).unwrap();
        let _ = rx.recv().await.unwrap();

        let outcome = pending.await;
        assert!(outcome.cancelled);
        assert_eq!(client.pending_count(), 0);
        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "CancelRollRequest");
        assert_eq!(frame["id"], id.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn answered_request_is_not_timed_out() {
        let (client, mut rx) = wired_client(ClientConfig {
            request_timeout_secs: Some(5),
        });
        let (id, pending) = client.request_roll_await(d6()).unwrap();
        let _ = rx.recv().await.unwrap();
        let frame = serde_json::json!({
            "type": "RollResponse",
            "id": id.as_str(),
            "rolls": [{"amount": 2, "faces": 6, "completedRolls": [1, 2]}],
        });
        let _ = client.handle_frame(&frame.to_string());
        assert!(!pending.await.cancelled);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
