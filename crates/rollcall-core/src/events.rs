//! Typed publish table for lifecycle and request events.
//!
//! A dispatcher is owned as a field by the server or client. Callers register
//! handlers per event kind with [`EventDispatcher::on`]; any number of
//! handlers may share a kind and run in registration order.
//!
//! Handlers are cloned out of the table before they run, so a handler can
//! call back into its owner (send a response, register another handler)
//! without deadlocking.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// An event with a fixed, enumerable kind.
pub trait DispatchEvent {
    /// Discriminant used as the subscription key.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// Opaque handle returned by [`EventDispatcher::on`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Maps event kinds to their handlers.
pub struct EventDispatcher<E: DispatchEvent> {
    handlers: RwLock<HashMap<E::Kind, Vec<(HandlerId, Handler<E>)>>>,
    next_id: AtomicU64,
}

impl<E: DispatchEvent> EventDispatcher<E> {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> HandlerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(hid, _)| *hid == id) {
                let _ = list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every handler of its kind. Returns how many ran.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let targets: Vec<Handler<E>> = self
            .handlers
            .read()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        tracing::trace!(?kind, handlers = targets.len(), "emit event");
        for handler in &targets {
            handler(event);
        }
        targets.len()
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: E::Kind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }
}

impl<E: DispatchEvent> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DispatchEvent> fmt::Debug for EventDispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<E::Kind, usize> = self
            .handlers
            .read()
            .iter()
            .map(|(k, v)| (*k, v.len()))
            .collect();
        f.debug_struct("EventDispatcher").field("handlers", &counts).finish()
    }
}
