//! Keyed context store with versions and TTL expiry.
//!
//! Values are JSON documents addressed by string key. Every write bumps
//! a per-key version counter, and an optional TTL turns into an
//! absolute deadline at write time. Expired entries are invisible to
//! reads immediately and physically reclaimed by the sweeper; see
//! [`crate::sweep`].
//!
//! Writes to the same key are serialized on the key's map entry, so
//! versions are gapless per key and the change events published for a
//! key never reorder. Writes to different keys proceed in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use plinth_bus::EventBus;
use plinth_core::{ChangeEvent, EventType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::errors::StoreError;

// ─── Types ───────────────────────────────────────────────────────────────────

/// A stored context value together with its bookkeeping fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    /// Key the value is stored under.
    pub key: String,
    /// The stored JSON value.
    pub value: Value,
    /// When this key's current lifecycle began.
    pub created_at: DateTime<Utc>,
    /// When the entry was last written.
    pub updated_at: DateTime<Utc>,
    /// Absolute expiry deadline, if a TTL was supplied on the last write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Write counter, starting at 1 and bumped on every overwrite.
    pub version: u64,
    /// Caller-supplied annotations, replaced wholesale on every write.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ContextEntry {
    /// Whether the entry is expired as of `at`.
    #[must_use]
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= at)
    }
}

/// One item of a [`ContextStore::bulk_set`] request.
#[derive(Debug)]
pub struct BulkSetItem {
    /// Key to write.
    pub key: String,
    /// Value to store.
    pub value: Value,
    /// Optional TTL, identical in meaning to the `ttl` argument of
    /// [`ContextStore::set`].
    pub ttl: Option<Duration>,
    /// Optional metadata for the entry.
    pub metadata: Option<HashMap<String, String>>,
}

/// Per-item outcome of a [`ContextStore::bulk_set`] request.
#[derive(Debug)]
pub struct BulkSetResult {
    /// Key the item addressed.
    pub key: String,
    /// The written entry, or why the item was rejected.
    pub outcome: Result<ContextEntry, StoreError>,
}

/// Point-in-time counters for the context store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    /// Entries physically present, live or not.
    pub total_entries: usize,
    /// Entries visible to reads.
    pub live_entries: usize,
    /// Expired entries awaiting the sweeper.
    pub expired_entries: usize,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Concurrent keyed store for JSON context values.
///
/// Cheap to share behind an [`std::sync::Arc`]; all methods take
/// `&self`.
pub struct ContextStore {
    entries: DashMap<String, ContextEntry>,
    bus: EventBus,
    closed: AtomicBool,
}

impl ContextStore {
    /// Create an empty store publishing change events on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            entries: DashMap::new(),
            bus,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(StoreError::unavailable("context store is closed"));
        }
        Ok(())
    }

    /// Write `value` under `key`, creating or overwriting the entry.
    ///
    /// `ttl`, when present, becomes an absolute deadline measured from
    /// now; when absent, any previous deadline is cleared and the entry
    /// persists until deleted. Overwriting a live entry bumps its
    /// version and keeps `created_at`; overwriting an expired remnant
    /// starts a fresh lifecycle at version 1.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] when `key` is empty or `ttl` is
    /// zero or out of range, [`StoreError::StorageUnavailable`] when
    /// the store is closed.
    #[instrument(skip(self, value, metadata))]
    pub fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<ContextEntry, StoreError> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(StoreError::invalid("context key must be non-empty"));
        }
        let now = Utc::now();
        let expires_at = match ttl {
            Some(ttl) => Some(Self::deadline_from(now, ttl)?),
            None => None,
        };
        let metadata = metadata.unwrap_or_default();

        let entry = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let prior = occupied.get();
                let (version, created_at, event_type) = if prior.is_expired_at(now) {
                    // The old lifecycle ended at its deadline even though the
                    // sweeper has not reclaimed it yet.
                    (1, now, EventType::Created)
                } else {
                    (prior.version + 1, prior.created_at, EventType::Updated)
                };
                let entry = ContextEntry {
                    key: key.to_owned(),
                    value,
                    created_at,
                    updated_at: now,
                    expires_at,
                    version,
                    metadata,
                };
                let _ = occupied.insert(entry.clone());
                let _ = self
                    .bus
                    .publish(ChangeEvent::context(key, event_type, version, expires_at));
                entry
            }
            Entry::Vacant(vacant) => {
                let entry = ContextEntry {
                    key: key.to_owned(),
                    value,
                    created_at: now,
                    updated_at: now,
                    expires_at,
                    version: 1,
                    metadata,
                };
                let _slot = vacant.insert(entry.clone());
                let _ = self
                    .bus
                    .publish(ChangeEvent::context(key, EventType::Created, 1, expires_at));
                entry
            }
        };

        debug!(key, version = entry.version, "context entry set");
        Ok(entry)
    }

    /// Look up the live entry stored under `key`.
    ///
    /// Returns `None` for unknown keys and for entries whose deadline
    /// has passed, whether or not the sweeper has reclaimed them.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ContextEntry> {
        let now = Utc::now();
        self.entries.get(key).and_then(|found| {
            let entry = found.value();
            if entry.is_expired_at(now) {
                None
            } else {
                Some(entry.clone())
            }
        })
    }

    /// Remove the entry stored under `key`.
    ///
    /// Returns whether a live entry was removed. Deleting an unknown
    /// key is not an error, and deleting an expired remnant reclaims it
    /// silently and reports `false`; only the removal of a live entry
    /// publishes a `deleted` event.
    ///
    /// # Errors
    ///
    /// [`StoreError::StorageUnavailable`] when the store is closed.
    #[instrument(skip(self))]
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.ensure_open()?;
        let now = Utc::now();
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(occupied) => {
                let (version, expires_at, was_live) = {
                    let entry = occupied.get();
                    (entry.version, entry.expires_at, !entry.is_expired_at(now))
                };
                if was_live {
                    let _ = self.bus.publish(ChangeEvent::context(
                        key,
                        EventType::Deleted,
                        version,
                        expires_at,
                    ));
                    debug!(key, version, "context entry deleted");
                }
                let _ = occupied.remove();
                Ok(was_live)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    /// List live entries whose key starts with `prefix`, ordered by
    /// key. An empty prefix matches everything. `limit` caps the result
    /// after ordering.
    #[must_use]
    pub fn list(&self, prefix: &str, limit: Option<usize>) -> Vec<ContextEntry> {
        let now = Utc::now();
        let mut entries: Vec<ContextEntry> = self
            .entries
            .iter()
            .filter(|found| found.key().starts_with(prefix) && !found.value().is_expired_at(now))
            .map(|found| found.value().clone())
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }

    /// Apply `items` in order, isolating failures per item.
    ///
    /// Each item behaves exactly like a [`ContextStore::set`] call; a
    /// rejected item never affects its neighbours. Results come back in
    /// request order.
    pub fn bulk_set(&self, items: Vec<BulkSetItem>) -> Vec<BulkSetResult> {
        items
            .into_iter()
            .map(|item| {
                let outcome = self.set(&item.key, item.value, item.ttl, item.metadata);
                BulkSetResult {
                    key: item.key,
                    outcome,
                }
            })
            .collect()
    }

    /// Remove expired entries and publish one `expired` event each.
    ///
    /// Returns the number of entries reclaimed. Intended for the
    /// sweeper task, but callable directly when a test needs a
    /// deterministic sweep.
    pub fn sweep_expired(&self) -> usize {
        if self.closed.load(Ordering::Relaxed) {
            return 0;
        }
        let now = Utc::now();
        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|found| found.value().is_expired_at(now))
            .map(|found| found.key().clone())
            .collect();

        let mut removed = 0_usize;
        for key in candidates {
            if let Entry::Occupied(occupied) = self.entries.entry(key) {
                // A concurrent set may have refreshed the entry since the
                // scan; only reclaim it if it is still expired.
                let (version, expires_at, still_expired) = {
                    let entry = occupied.get();
                    (entry.version, entry.expires_at, entry.is_expired_at(now))
                };
                if still_expired {
                    let _ = self.bus.publish(ChangeEvent::context(
                        occupied.key(),
                        EventType::Expired,
                        version,
                        expires_at,
                    ));
                    let _ = occupied.remove();
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            counter!("context_swept_entries_total").increment(removed as u64);
            debug!(removed, "swept expired context entries");
        }
        removed
    }

    /// Counters over the entries physically present right now.
    #[must_use]
    pub fn stats(&self) -> ContextStats {
        let now = Utc::now();
        let mut live = 0_usize;
        let mut expired = 0_usize;
        for found in self.entries.iter() {
            if found.value().is_expired_at(now) {
                expired += 1;
            } else {
                live += 1;
            }
        }
        ContextStats {
            total_entries: live + expired,
            live_entries: live,
            expired_entries: expired,
        }
    }

    /// Refuse further mutations. Reads keep serving the in-memory data.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    fn deadline_from(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
        if ttl.is_zero() {
            return Err(StoreError::invalid("ttl must be a positive duration"));
        }
        let delta = chrono::Duration::from_std(ttl)
            .map_err(|_| StoreError::invalid("ttl out of range"))?;
        now.checked_add_signed(delta)
            .ok_or_else(|| StoreError::invalid("ttl out of range"))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
