//! Subscription handles produced by [`crate::EventBus::subscribe`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use plinth_core::events::ChangeEvent;
use tokio::sync::mpsc;

use crate::bus::EventBus;
use crate::errors::BusError;

/// Delivery health of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Keeping up; last delivery succeeded.
    Active,
    /// At least one event was dropped because the queue was full; recovers
    /// to [`SubscriptionState::Active`] on the next successful delivery.
    Slow,
    /// Deregistered from the bus. See [`CloseReason`].
    Closed,
}

/// Why a subscription stopped receiving events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The handle was unsubscribed or dropped.
    Unsubscribed,
    /// Force-closed after the slow-consumer threshold.
    Evicted,
    /// The bus was shut down.
    Shutdown,
}

const STATE_ACTIVE: u8 = 0;
const STATE_SLOW: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// State shared between the bus registry and the consumer handle.
#[derive(Debug)]
pub(crate) struct SubscriptionShared {
    state: AtomicU8,
    close_reason: OnceLock<CloseReason>,
}

impl SubscriptionShared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_ACTIVE),
            close_reason: OnceLock::new(),
        }
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        match self.state.load(Ordering::Relaxed) {
            STATE_ACTIVE => SubscriptionState::Active,
            STATE_SLOW => SubscriptionState::Slow,
            _ => SubscriptionState::Closed,
        }
    }

    /// Record delivery health. Never resurrects a closed subscription
    /// (closed entries are removed from the registry before any further
    /// delivery attempt).
    pub(crate) fn set_state(&self, state: SubscriptionState) {
        let raw = match state {
            SubscriptionState::Active => STATE_ACTIVE,
            SubscriptionState::Slow => STATE_SLOW,
            SubscriptionState::Closed => STATE_CLOSED,
        };
        self.state.store(raw, Ordering::Relaxed);
    }

    /// Mark closed with a reason. The first reason wins.
    pub(crate) fn close(&self, reason: CloseReason) {
        let _ = self.close_reason.set(reason);
        self.state.store(STATE_CLOSED, Ordering::Relaxed);
    }

    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }
}

/// Live event sequence handed to one subscriber.
///
/// Consume with [`Subscription::recv`]. Dropping the handle deregisters it
/// from the bus; already-queued events are discarded with it.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    rx: mpsc::Receiver<Arc<ChangeEvent>>,
    shared: Arc<SubscriptionShared>,
    bus: EventBus,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        rx: mpsc::Receiver<Arc<ChangeEvent>>,
        shared: Arc<SubscriptionShared>,
        bus: EventBus,
    ) -> Self {
        Self {
            id,
            rx,
            shared,
            bus,
        }
    }

    /// Subscriber id (`sub_<uuid>`).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current delivery health.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// Why the stream ended, once it has.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason()
    }

    /// Wait for the next matching event.
    ///
    /// Returns `Ok(None)` when the stream ends gracefully (unsubscribe or
    /// bus shutdown) and [`BusError::SlowConsumerEvicted`] when the bus
    /// force-closed this subscription; in both cases events already queued
    /// are yielded first.
    pub async fn recv(&mut self) -> Result<Option<Arc<ChangeEvent>>, BusError> {
        match self.rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => match self.shared.close_reason() {
                Some(CloseReason::Evicted) => Err(BusError::SlowConsumerEvicted),
                _ => Ok(None),
            },
        }
    }

    /// Deregister from the bus. Equivalent to dropping the handle;
    /// idempotent with respect to eviction and shutdown.
    pub fn unsubscribe(self) {
        // Drop does the deregistration.
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.bus.deregister(&self.id, CloseReason::Unsubscribed);
    }
}
