//! Inbound frame dispatch: decodes client text and routes it to liveness
//! tracking or the server's event table.

use rollcall_core::{ClientMessage, EventDispatcher, ServerMessage, codec};
use tracing::{debug, warn};

use super::connection::Connection;
use crate::events::ServerEvent;

/// Handle one inbound text frame from `connection`.
///
/// Decode failures never close the connection. Reportable ones fire the
/// error event, unrecognized message types are only logged.
pub fn handle_frame(text: &str, connection: &Connection, events: &EventDispatcher<ServerEvent>) {
    let message = match codec::decode::<ClientMessage>(text) {
        Ok(m) => m,
        Err(e) if e.is_reportable() => {
            warn!(connection_id = %connection.id, error = %e, "invalid message received");
            let _ = events.emit(&ServerEvent::error(Some(connection.id.clone()), e));
            return;
        }
        Err(e) => {
            warn!(connection_id = %connection.id, error = %e, "dropping message");
            return;
        }
    };

    debug!(connection_id = %connection.id, message = message_name(&message), "message received");
    match message {
        ClientMessage::Pong => connection.mark_alive(),
        ClientMessage::Ping => {
            let _ = connection.send_message(&ServerMessage::Pong);
        }
        ClientMessage::RollRequest { id, rolls } => {
            let _ = events.emit(&ServerEvent::RollRequested {
                connection_id: connection.id.clone(),
                request_id: id,
                rolls,
            });
        }
        ClientMessage::CancelRollRequest { id } => {
            let _ = events.emit(&ServerEvent::RollCancelled {
                connection_id: connection.id.clone(),
                request_id: id,
            });
        }
    }
}

fn message_name(message: &ClientMessage) -> &'static str {
    use rollcall_core::messages::WireMessage;
    message.type_name()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use rollcall_core::{CodecError, DiceError, RollDescriptor};
    use tokio::sync::mpsc;

    use super::*;
    use crate::events::ServerEventKind;

    struct Fixture {
        conn: Connection,
        rx: mpsc::Receiver<Arc<String>>,
        events: EventDispatcher<ServerEvent>,
        seen: Arc<Mutex<Vec<ServerEvent>>>,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = mpsc::channel(8);
        let conn = Connection::new("conn_h".into(), tx);
        let events = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            ServerEventKind::Error,
            ServerEventKind::RollRequested,
            ServerEventKind::RollCancelled,
        ] {
            let s = seen.clone();
            let _ = events.on(kind, move |e: &ServerEvent| s.lock().push(e.clone()));
        }
        Fixture { conn, rx, events, seen }
    }

    #[test]
    fn roll_request_fires_event() {
        let f = fixture();
        handle_frame(
            r#"{"type":"RollRequest","id":"r1","rolls":[{"amount":2,"faces":6}]}"#,
            &f.conn,
            &f.events,
        );
        let seen = f.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_matches!(&seen[0], ServerEvent::RollRequested { connection_id, request_id, rolls } => {
            assert_eq!(connection_id.as_str(), "conn_h");
            assert_eq!(request_id.as_str(), "r1");
            assert_eq!(rolls, &vec![RollDescriptor { amount: 2, faces: 6 }]);
        });
    }

    #[test]
    fn cancel_request_fires_event() {
        let f = fixture();
        handle_frame(r#"{"type":"CancelRollRequest","id":"r1"}"#, &f.conn, &f.events);
        assert_matches!(&f.seen.lock()[0], ServerEvent::RollCancelled { request_id, .. } => {
            assert_eq!(request_id.as_str(), "r1");
        });
    }

    #[test]
    fn pong_marks_alive() {
        let f = fixture();
        let _ = f.conn.take_alive();
        handle_frame(r#"{"type":"Pong"}"#, &f.conn, &f.events);
        assert!(f.conn.is_alive());
        assert!(f.seen.lock().is_empty());
    }

    #[test]
    fn ping_is_answered() {
        let mut f = fixture();
        handle_frame(r#"{"type":"Ping"}"#, &f.conn, &f.events);
        assert_eq!(&*f.rx.try_recv().unwrap(), r#"{"type":"Pong"}"#);
    }

    #[test]
    fn malformed_fires_error_and_keeps_connection() {
        let f = fixture();
        handle_frame("{not json", &f.conn, &f.events);
        assert!(!f.conn.is_terminated());
        assert_matches!(&f.seen.lock()[0], ServerEvent::Error { connection_id: Some(id), error } => {
            assert_eq!(id.as_str(), "conn_h");
            assert_matches!(**error, DiceError::Codec(CodecError::Malformed(_)));
        });
    }

    #[test]
    fn invalid_descriptor_fires_error() {
        let f = fixture();
        handle_frame(
            r#"{"type":"RollRequest","id":"r1","rolls":[{"amount":0,"faces":6}]}"#,
            &f.conn,
            &f.events,
        );
        assert_matches!(&f.seen.lock()[0], ServerEvent::Error { error, .. } => {
            assert_matches!(**error, DiceError::Codec(CodecError::InvalidDescriptor(_)));
        });
    }

    #[test]
    fn server_bound_role_confusion_is_dropped_quietly() {
        let f = fixture();
        handle_frame(
            r#"{"type":"RollResponse","id":"r1","rolls":[{"amount":1,"faces":6,"completedRolls":[4]}]}"#,
            &f.conn,
            &f.events,
        );
        assert!(f.seen.lock().is_empty());
        assert!(!f.conn.is_terminated());
    }
}
