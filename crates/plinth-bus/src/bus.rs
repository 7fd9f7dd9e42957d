//! Event fan-out with a bounded replay ring and per-subscription queues.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use plinth_core::events::{ChangeEvent, EventFilter};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::errors::BusError;
use crate::subscription::{CloseReason, Subscription, SubscriptionShared, SubscriptionState};

/// Registry entry for one live subscription.
#[derive(Debug)]
struct SubEntry {
    filter: EventFilter,
    tx: mpsc::Sender<Arc<ChangeEvent>>,
    shared: Arc<SubscriptionShared>,
    /// Consecutive publishes that found the delivery queue full.
    full_streak: u32,
}

/// Mutable bus state, guarded by one short-lived lock.
#[derive(Debug)]
struct BusInner {
    /// Next sequence number to assign (1-based).
    next_seq: u64,
    /// Recent events retained for replay, oldest first.
    ring: VecDeque<Arc<ChangeEvent>>,
    /// Live subscriptions keyed by subscriber id.
    subscriptions: HashMap<String, SubEntry>,
    closed: bool,
}

#[derive(Debug)]
struct BusShared {
    config: BusConfig,
    inner: Mutex<BusInner>,
}

/// Point-in-time counters for observability endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStats {
    /// Live subscriptions.
    pub subscriptions: usize,
    /// Next sequence number to be assigned.
    pub next_seq: u64,
    /// Events currently held in the replay ring.
    pub retained: usize,
}

/// Fan-out hub connecting the state stores to their subscribers.
///
/// Cheap to clone; clones share one registry. `publish` never blocks and
/// never awaits: delivery is a bounded try-send per subscription, and a
/// subscription that stays full for `slow_consumer_threshold` consecutive
/// publishes is force-closed without affecting the others.
#[derive(Clone, Debug)]
pub struct EventBus {
    shared: Arc<BusShared>,
}

impl EventBus {
    /// Create a bus with the given configuration (clamped via
    /// [`BusConfig::validate`]).
    #[must_use]
    pub fn new(mut config: BusConfig) -> Self {
        config.validate();
        Self {
            shared: Arc::new(BusShared {
                config,
                inner: Mutex::new(BusInner {
                    next_seq: 1,
                    ring: VecDeque::new(),
                    subscriptions: HashMap::new(),
                    closed: false,
                }),
            }),
        }
    }

    /// Register a subscription.
    ///
    /// With `replay_from`, retained events with `seq >= replay_from` that
    /// match `filter` are queued ahead of any live event; the replayed prefix
    /// and the live suffix are contiguous and duplicate-free. Fails with
    /// [`BusError::ReplayGapDetected`] when events in the requested range
    /// have already been evicted from the ring, and [`BusError::Closed`]
    /// after shutdown. A `replay_from` at or past the head replays nothing.
    #[instrument(skip(self))]
    pub fn subscribe(
        &self,
        filter: EventFilter,
        replay_from: Option<u64>,
    ) -> Result<Subscription, BusError> {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return Err(BusError::Closed);
        }

        let replay: Vec<Arc<ChangeEvent>> = match replay_from {
            Some(from) => {
                let oldest = inner.ring.front().map_or(inner.next_seq, |e| e.seq);
                // Seqs are 1-based and contiguous, so events existed in
                // [max(from, 1), oldest) exactly when that range is non-empty.
                if from.max(1) < oldest {
                    return Err(BusError::ReplayGapDetected {
                        requested: from,
                        oldest_retained: oldest,
                    });
                }
                inner
                    .ring
                    .iter()
                    .filter(|e| e.seq >= from && filter.matches(e))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };

        let id = format!("sub_{}", Uuid::now_v7());
        // One-off allowance so an admitted replay always fits the queue.
        let capacity = self.shared.config.queue_capacity.max(replay.len());
        let (tx, rx) = mpsc::channel(capacity);
        for event in replay {
            let _ = tx.try_send(event);
        }

        let shared = Arc::new(SubscriptionShared::new());
        let _ = inner.subscriptions.insert(
            id.clone(),
            SubEntry {
                filter,
                tx,
                shared: Arc::clone(&shared),
                full_streak: 0,
            },
        );
        gauge!("bus_active_subscriptions").set(inner.subscriptions.len() as f64);
        debug!(subscriber_id = %id, "subscription registered");
        Ok(Subscription::new(id, rx, shared, self.clone()))
    }

    /// Publish one store event to every matching subscription.
    ///
    /// Assigns and returns the global sequence number. Non-blocking: a full
    /// delivery queue drops the event for that subscription only, and a
    /// subscription past the slow-consumer threshold is evicted in place.
    /// After shutdown the seq is still assigned but nothing is delivered.
    pub fn publish(&self, mut event: ChangeEvent) -> u64 {
        let mut inner = self.shared.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        event.seq = seq;
        if inner.closed {
            return seq;
        }
        let event = Arc::new(event);

        inner.ring.push_back(Arc::clone(&event));
        if inner.ring.len() > self.shared.config.replay_capacity {
            let _ = inner.ring.pop_front();
        }

        let threshold = self.shared.config.slow_consumer_threshold;
        let mut delivered = 0u32;
        inner.subscriptions.retain(|id, entry| {
            if !entry.filter.matches(&event) {
                return true;
            }
            match entry.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    delivered += 1;
                    entry.full_streak = 0;
                    entry.shared.set_state(SubscriptionState::Active);
                    true
                }
                Err(TrySendError::Full(_)) => {
                    counter!("bus_delivery_drops_total").increment(1);
                    entry.full_streak += 1;
                    if entry.full_streak >= threshold {
                        counter!("bus_slow_consumer_evictions_total").increment(1);
                        warn!(subscriber_id = %id, streak = entry.full_streak, "evicting slow subscriber");
                        entry.shared.close(CloseReason::Evicted);
                        false
                    } else {
                        entry.shared.set_state(SubscriptionState::Slow);
                        warn!(subscriber_id = %id, streak = entry.full_streak, "delivery queue full, event dropped for subscriber");
                        true
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    // Receiver vanished without deregistering.
                    entry.shared.close(CloseReason::Unsubscribed);
                    false
                }
            }
        });

        counter!("bus_events_published_total").increment(1);
        gauge!("bus_active_subscriptions").set(inner.subscriptions.len() as f64);
        debug!(seq, resource_id = %event.resource_id, delivered, "published change event");
        seq
    }

    /// Remove a subscription from the registry. Returns whether it was
    /// still registered. Called from [`Subscription`] on drop/unsubscribe.
    pub(crate) fn deregister(&self, id: &str, reason: CloseReason) -> bool {
        let mut inner = self.shared.inner.lock();
        match inner.subscriptions.remove(id) {
            Some(entry) => {
                entry.shared.close(reason);
                gauge!("bus_active_subscriptions").set(inner.subscriptions.len() as f64);
                debug!(subscriber_id = %id, ?reason, "subscription deregistered");
                true
            }
            None => false,
        }
    }

    /// Close every subscription, clear the ring, and reject further
    /// subscribes. Consumers see a graceful end of stream after draining.
    /// Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        let closed = inner.subscriptions.len();
        for (_, entry) in inner.subscriptions.drain() {
            entry.shared.close(CloseReason::Shutdown);
        }
        inner.ring.clear();
        gauge!("bus_active_subscriptions").set(0.0);
        info!(closed, "event bus shut down");
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.shared.inner.lock().subscriptions.len()
    }

    /// Point-in-time counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let inner = self.shared.inner.lock();
        BusStats {
            subscriptions: inner.subscriptions.len(),
            next_seq: inner.next_seq,
            retained: inner.ring.len(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
