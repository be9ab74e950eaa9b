//! Live connection table keyed by connection identity.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rollcall_core::codec;
use rollcall_core::messages::WireMessage;
use rollcall_core::{ConnectionId, EventDispatcher, IdError, IdGenerator, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::connection::{Connection, SendFailure};
use crate::events::ServerEvent;

/// Outcome of addressing one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame is queued for the writer.
    Queued,
    /// No such connection, or its writer has exited.
    Gone,
    /// The connection is open but its send queue is full; the frame was dropped.
    QueueFull,
}

/// Owns every open connection and fans frames out to them.
///
/// Events are emitted after the table lock is released.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    ids: IdGenerator,
    events: Arc<EventDispatcher<ServerEvent>>,
}

impl ConnectionRegistry {
    /// Create an empty registry with random `conn_…` identities.
    pub fn new(events: Arc<EventDispatcher<ServerEvent>>) -> Self {
        Self::with_id_generator(events, IdGenerator::connections())
    }

    /// Create an empty registry drawing identities from `ids`.
    pub fn with_id_generator(events: Arc<EventDispatcher<ServerEvent>>, ids: IdGenerator) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            ids,
            events,
        }
    }

    /// Register a new connection writing to `tx`.
    ///
    /// `greeting` frames are queued before the connection becomes visible to
    /// [`broadcast`](Self::broadcast), so they always arrive first. Does not
    /// fire `ConnectionOpened`: callers emit it once they hold no locks.
    pub fn register(
        &self,
        tx: mpsc::Sender<Arc<String>>,
        greeting: &[ServerMessage],
    ) -> Result<Arc<Connection>, IdError> {
        let mut conns = self.connections.write();
        let id = self.ids.generate(|candidate| conns.contains_key(candidate))?;
        let connection = Arc::new(Connection::new(ConnectionId::from(id), tx));
        for frame in greeting {
            let _ = connection.send_message(frame);
        }
        let _ = conns.insert(connection.id.clone(), Arc::clone(&connection));
        debug!(connection_id = %connection.id, total = conns.len(), "connection registered");
        Ok(connection)
    }

    /// Remove a connection and fire `ConnectionClosed`.
    ///
    /// Unregistering an absent identity is a silent no-op.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.write().remove(id);
        if let Some(ref connection) = removed {
            debug!(connection_id = %id, age_ms = connection.age().as_millis(), "connection unregistered");
            let _ = self.events.emit(&ServerEvent::ConnectionClosed {
                connection_id: id.clone(),
            });
        }
        removed
    }

    /// Look up a live connection.
    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Send a message to one connection.
    ///
    /// An absent identity is not an error: the peer may have gone away
    /// between request and response.
    pub fn send_to(&self, id: &ConnectionId, message: &ServerMessage) -> Delivery {
        let Some(connection) = self.lookup(id) else {
            debug!(connection_id = %id, message = message.type_name(), "send to unknown connection dropped");
            return Delivery::Gone;
        };
        match connection.try_send_message(message) {
            Ok(()) => Delivery::Queued,
            Err(SendFailure::Closed) => {
                debug!(connection_id = %id, message = message.type_name(), "writer gone, message dropped");
                Delivery::Gone
            }
            Err(SendFailure::Full) => {
                warn!(
                    connection_id = %id,
                    message = message.type_name(),
                    dropped = connection.drop_count(),
                    "send queue full, message dropped"
                );
                Delivery::QueueFull
            }
        }
    }

    /// Send a message to every registered connection. Returns the number of
    /// connections that accepted it.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let json = match codec::encode(message) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(message = message.type_name(), error = %e, "failed to encode broadcast");
                return 0;
            }
        };
        let conns = self.connections.read();
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.send(Arc::clone(&json)) {
                delivered += 1;
            } else {
                warn!(connection_id = %conn.id, "failed to send broadcast to client");
            }
        }
        debug!(message = message.type_name(), recipients = conns.len(), delivered, "broadcast");
        delivered
    }

    /// All live connections at this instant.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Terminate and unregister every connection.
    pub fn clear(&self) -> usize {
        let drained: Vec<Arc<Connection>> = self.connections.write().drain().map(|(_, c)| c).collect();
        for connection in &drained {
            connection.terminate();
            let _ = self.events.emit(&ServerEvent::ConnectionClosed {
                connection_id: connection.id.clone(),
            });
        }
        drained.len()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use rollcall_core::SupportedDice;
    use rollcall_core::ids::SequenceIdSource;

    use super::*;
    use crate::events::ServerEventKind;

    fn make_registry() -> (ConnectionRegistry, Arc<EventDispatcher<ServerEvent>>) {
        let events = Arc::new(EventDispatcher::new());
        (ConnectionRegistry::new(events.clone()), events)
    }

    fn connect(registry: &ConnectionRegistry) -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(8);
        (registry.register(tx, &[]).unwrap(), rx)
    }

    fn record(events: &EventDispatcher<ServerEvent>, kind: ServerEventKind) -> Arc<Mutex<Vec<ConnectionId>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _ = events.on(kind, move |e| match e {
            ServerEvent::ConnectionOpened { connection_id } | ServerEvent::ConnectionClosed { connection_id } => {
                s.lock().push(connection_id.clone());
            }
            _ => {}
        });
        seen
    }

    #[test]
    fn register_assigns_unique_ids() {
        let (registry, _events) = make_registry();
        let a = connect(&registry).0;
        let b = connect(&registry).0;

        assert_ne!(a.id, b.id);
        assert!(a.id.as_str().starts_with("conn_"));
        assert!(a.is_alive());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn register_queues_greeting_in_order() {
        let (registry, _events) = make_registry();
        let (tx, mut rx) = mpsc::channel(8);
        let greeting = rollcall_core::protocol::greeting(&SupportedDice::faces([6]));
        let _ = registry.register(tx, &greeting).unwrap();

        assert_eq!(&*rx.try_recv().unwrap(), r#"{"type":"ServerVersion","version":1}"#);
        assert_eq!(&*rx.try_recv().unwrap(), r#"{"type":"SupportedDice","dice":[6]}"#);
    }

    #[test]
    fn register_redraws_on_collision() {
        let events = Arc::new(EventDispatcher::new());
        let ids = IdGenerator::with_source("conn", SequenceIdSource::new(["x", "x", "y"]));
        let registry = ConnectionRegistry::with_id_generator(events, ids);
        assert_eq!(connect(&registry).0.id.as_str(), "conn_x");
        assert_eq!(connect(&registry).0.id.as_str(), "conn_y");
    }

    #[test]
    fn unregister_is_idempotent() {
        let (registry, events) = make_registry();
        let closed = record(&events, ServerEventKind::ConnectionClosed);
        let (conn, _rx) = connect(&registry);

        assert!(registry.unregister(&conn.id).is_some());
        assert!(registry.unregister(&conn.id).is_none());
        assert!(registry.unregister(&ConnectionId::from("never")).is_none());
        assert_eq!(closed.lock().len(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn send_to_known_connection() {
        let (registry, _events) = make_registry();
        let (conn, mut rx) = connect(&registry);
        assert_eq!(registry.send_to(&conn.id, &ServerMessage::Ping), Delivery::Queued);
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"type":"Ping"}"#);
    }

    #[test]
    fn send_to_unknown_connection_is_dropped() {
        let (registry, _events) = make_registry();
        assert_eq!(registry.send_to(&ConnectionId::from("gone"), &ServerMessage::Ping), Delivery::Gone);
    }

    #[test]
    fn send_to_tells_full_from_gone() {
        let (registry, _events) = make_registry();
        let (tx, rx) = mpsc::channel(1);
        let conn = registry.register(tx, &[]).unwrap();

        assert_eq!(registry.send_to(&conn.id, &ServerMessage::Ping), Delivery::Queued);
        assert_eq!(registry.send_to(&conn.id, &ServerMessage::Ping), Delivery::QueueFull);
        drop(rx);
        assert_eq!(registry.send_to(&conn.id, &ServerMessage::Ping), Delivery::Gone);
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn broadcast_reaches_everyone() {
        let (registry, _events) = make_registry();
        let (_a, mut rx1) = connect(&registry);
        let (_b, mut rx2) = connect(&registry);

        assert_eq!(registry.broadcast(&ServerMessage::Pong), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn broadcast_to_empty_registry() {
        let (registry, _events) = make_registry();
        assert_eq!(registry.broadcast(&ServerMessage::Ping), 0);
    }

    #[test]
    fn broadcast_skips_full_queue() {
        let (registry, _events) = make_registry();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(8);
        let full = registry.register(tx1, &[]).unwrap();
        let _ = registry.register(tx2, &[]).unwrap();
        assert!(full.send(Arc::new("filler".into())));

        assert_eq!(registry.broadcast(&ServerMessage::Ping), 1);
        assert_eq!(full.drop_count(), 1);
    }

    #[test]
    fn clear_terminates_and_emits() {
        let (registry, events) = make_registry();
        let closed = record(&events, ServerEventKind::ConnectionClosed);
        let (a, _rx1) = connect(&registry);
        let (b, _rx2) = connect(&registry);

        assert_eq!(registry.clear(), 2);
        assert!(a.is_terminated());
        assert!(b.is_terminated());
        assert!(registry.is_empty());
        assert_eq!(closed.lock().len(), 2);
        // Session cleanup after clear is a no-op
        assert!(registry.unregister(&a.id).is_none());
        assert_eq!(closed.lock().len(), 2);
    }

    #[test]
    fn handler_can_use_registry_during_close_event() {
        let events = Arc::new(EventDispatcher::new());
        let registry = Arc::new(ConnectionRegistry::new(events.clone()));
        let inner = registry.clone();
        let remaining = Arc::new(Mutex::new(None));
        let r = remaining.clone();
        let _ = events.on(ServerEventKind::ConnectionClosed, move |_| {
            *r.lock() = Some(inner.len());
        });
        let (a, _rx1) = connect(&registry);
        let (_b, _rx2) = connect(&registry);
        let _ = registry.unregister(&a.id);
        assert_eq!(*remaining.lock(), Some(1));
    }
}
