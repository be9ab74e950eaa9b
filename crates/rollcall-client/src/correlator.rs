//! Pending request table matching responses and cancellations to the
//! requests that caused them.
//!
//! Each issued request settles exactly once: answered by [`resolve`], or
//! withdrawn by [`cancel`], [`abandon`] or [`cancel_all_local`]. Later attempts to settle the
//! same identity find nothing pending and are dropped.
//!
//! [`resolve`]: RequestCorrelator::resolve
//! [`cancel`]: RequestCorrelator::cancel
//! [`abandon`]: RequestCorrelator::abandon
//! [`cancel_all_local`]: RequestCorrelator::cancel_all_local

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use rollcall_core::{
    ClientMessage, CompletedRollDescriptor, EventDispatcher, IdGenerator, RequestId, RollDescriptor, RollOutcome,
};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::errors::ClientError;
use crate::events::ClientEvent;
use crate::outbound::Outbound;

/// How a settled request is reported.
#[derive(Debug)]
pub enum Continuation {
    /// Report through the `RollResponse` / `RollCancelled` events.
    Detached,
    /// Fulfil an awaiting [`PendingRoll`].
    Awaiting(oneshot::Sender<RollOutcome>),
}

impl Continuation {
    /// An awaiting continuation and the future it fulfils.
    pub fn awaiting() -> (Self, PendingRoll) {
        let (tx, rx) = oneshot::channel();
        (Self::Awaiting(tx), PendingRoll { rx })
    }
}

/// Resolves to the outcome of an await-style request.
///
/// Yields a cancelled outcome if the request is dropped without settling.
#[derive(Debug)]
pub struct PendingRoll {
    rx: oneshot::Receiver<RollOutcome>,
}

impl Future for PendingRoll {
    type Output = RollOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<RollOutcome> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| RollOutcome::cancelled()))
    }
}

/// Owns the pending request table.
pub struct RequestCorrelator {
    pending: Mutex<HashMap<RequestId, Continuation>>,
    ids: IdGenerator,
    outbound: Arc<Outbound>,
    events: Arc<EventDispatcher<ClientEvent>>,
}

impl RequestCorrelator {
    /// Create an empty table with random `roll_…` identities.
    pub fn new(outbound: Arc<Outbound>, events: Arc<EventDispatcher<ClientEvent>>) -> Self {
        Self::with_id_generator(outbound, events, IdGenerator::requests())
    }

    /// Create an empty table drawing identities from `ids`.
    pub fn with_id_generator(
        outbound: Arc<Outbound>,
        events: Arc<EventDispatcher<ClientEvent>>,
        ids: IdGenerator,
    ) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ids,
            outbound,
            events,
        }
    }

    /// Record a new request and send it.
    ///
    /// The entry stays pending even when the send is dropped for lack of a
    /// connection, so the caller can still cancel it.
    pub fn issue(&self, rolls: Vec<RollDescriptor>, continuation: Continuation) -> Result<RequestId, ClientError> {
        if rolls.is_empty() {
            return Err(ClientError::EmptyRequest);
        }
        rolls.iter().try_for_each(RollDescriptor::validate)?;

        let id = {
            let mut pending = self.pending.lock();
            let id = RequestId::from(self.ids.generate(|candidate| pending.contains_key(candidate))?);
            let _ = pending.insert(id.clone(), continuation);
            id
        };
        debug!(request_id = %id, descriptors = rolls.len(), "roll requested");
        let _ = self.outbound.send(&ClientMessage::RollRequest { id: id.clone(), rolls });
        Ok(id)
    }

    /// Settle a request with the server's results.
    ///
    /// Returns `false` (and drops the results) when `id` is not pending.
    pub fn resolve(&self, id: &RequestId, rolls: Vec<CompletedRollDescriptor>) -> bool {
        let Some(continuation) = self.pending.lock().remove(id) else {
            debug!(request_id = %id, "response for a request that is not pending, dropping");
            return false;
        };
        match continuation {
            Continuation::Awaiting(tx) => {
                let _ = tx.send(RollOutcome::completed(rolls));
            }
            Continuation::Detached => {
                let _ = self.events.emit(&ClientEvent::RollResponse {
                    request_id: id.clone(),
                    rolls,
                });
            }
        }
        true
    }

    /// Withdraw a request and tell the server. No acknowledgement follows.
    ///
    /// Returns `false` when `id` is not pending.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let Some(continuation) = self.pending.lock().remove(id) else {
            debug!(request_id = %id, "cancel for a request that is not pending, dropping");
            return false;
        };
        self.settle_cancelled(id.clone(), continuation);
        let _ = self.outbound.send(&ClientMessage::CancelRollRequest { id: id.clone() });
        true
    }

    /// Cancel one request without telling the server. Used when the server's
    /// answer arrived but could not be accepted.
    ///
    /// Returns `false` when `id` is not pending.
    pub fn abandon(&self, id: &RequestId) -> bool {
        let Some(continuation) = self.pending.lock().remove(id) else {
            return false;
        };
        self.settle_cancelled(id.clone(), continuation);
        true
    }

    /// Cancel every pending request without sending anything. Used when the
    /// connection is gone and no response can arrive.
    pub fn cancel_all_local(&self) -> usize {
        let drained: Vec<(RequestId, Continuation)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, continuation) in drained {
            self.settle_cancelled(id, continuation);
        }
        if count > 0 {
            info!(count, "cancelled pending requests after connection loss");
        }
        count
    }

    /// Number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether `id` is pending.
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.lock().contains_key(id)
    }

    fn settle_cancelled(&self, request_id: RequestId, continuation: Continuation) {
        match continuation {
            Continuation::Awaiting(tx) => {
                let _ = tx.send(RollOutcome::cancelled());
            }
            Continuation::Detached => {
                let _ = self.events.emit(&ClientEvent::RollCancelled { request_id });
            }
        }
    }
}
