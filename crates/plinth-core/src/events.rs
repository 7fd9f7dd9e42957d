//! Change events produced by the state stores.
//!
//! Every committed mutation in the context store or the file version store
//! becomes one [`ChangeEvent`]. Events are transient: they exist in transit
//! through the event bus (plus its bounded replay ring) and are never
//! persisted. The [`PayloadSummary`] carries a small snapshot of the mutated
//! resource, never the full value or content, so fan-out stays cheap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// ResourceKind / EventType
// ─────────────────────────────────────────────────────────────────────────────

/// Which store a change event originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Keyed context store entry.
    Context,
    /// File version store lineage.
    File,
}

/// What happened to the resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Resource came into existence (first `set` for a key, first version
    /// for a path).
    Created,
    /// Live resource was replaced or extended (subsequent `set`, subsequent
    /// `put`).
    Updated,
    /// Resource was removed by an explicit delete.
    Deleted,
    /// Context entry was removed by the expiry sweep.
    Expired,
}

// ─────────────────────────────────────────────────────────────────────────────
// PayloadSummary
// ─────────────────────────────────────────────────────────────────────────────

/// Small descriptive snapshot attached to a [`ChangeEvent`].
///
/// For `deleted`/`expired` events this describes the last live state of the
/// resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PayloadSummary {
    /// Context entry snapshot.
    #[serde(rename_all = "camelCase")]
    Context {
        /// Entry version after the mutation (last live version for
        /// `deleted`/`expired`).
        version: u64,
        /// Absolute expiry deadline, if one is set.
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
    /// File version snapshot.
    #[serde(rename_all = "camelCase")]
    File {
        /// Version number written (latest version for `deleted`).
        version_number: u64,
        /// Content size in bytes.
        size: u64,
        /// Lower-case hex SHA-256 of the content.
        content_hash: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// ChangeEvent
// ─────────────────────────────────────────────────────────────────────────────

/// One committed store mutation, as observed by subscribers.
///
/// `seq` is the global publish sequence number. It is assigned by the event
/// bus when the event is published; constructors set it to 0. Subscribers can
/// use it to detect missed deliveries and to request replay on resubscribe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Global publish sequence number (bus-assigned, 0 before publish).
    pub seq: u64,
    /// Originating store.
    pub resource_kind: ResourceKind,
    /// Context key or file path.
    pub resource_id: String,
    /// What happened.
    pub event_type: EventType,
    /// When the mutation committed.
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the mutated resource.
    pub summary: PayloadSummary,
}

impl ChangeEvent {
    /// Build a context-store event with the current UTC timestamp.
    #[must_use]
    pub fn context(
        key: impl Into<String>,
        event_type: EventType,
        version: u64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            seq: 0,
            resource_kind: ResourceKind::Context,
            resource_id: key.into(),
            event_type,
            timestamp: Utc::now(),
            summary: PayloadSummary::Context {
                version,
                expires_at,
            },
        }
    }

    /// Build a file-store event with the current UTC timestamp.
    #[must_use]
    pub fn file(
        path: impl Into<String>,
        event_type: EventType,
        version_number: u64,
        size: u64,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            seq: 0,
            resource_kind: ResourceKind::File,
            resource_id: path.into(),
            event_type,
            timestamp: Utc::now(),
            summary: PayloadSummary::File {
                version_number,
                size,
                content_hash: content_hash.into(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EventFilter
// ─────────────────────────────────────────────────────────────────────────────

/// Subscriber-side predicate over change events.
///
/// `None` fields match everything; an empty `id_prefix` matches every id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    /// Restrict to one store, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ResourceKind>,
    /// Restrict to resource ids starting with this prefix, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_prefix: Option<String>,
}

impl EventFilter {
    /// Filter matching events from one store only.
    #[must_use]
    pub fn for_kind(kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            id_prefix: None,
        }
    }

    /// Filter matching resource ids under a prefix, in either store.
    #[must_use]
    pub fn for_prefix(prefix: impl Into<String>) -> Self {
        Self {
            kind: None,
            id_prefix: Some(prefix.into()),
        }
    }

    /// Whether `event` passes this filter.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if self.kind.is_some_and(|k| k != event.resource_kind) {
            return false;
        }
        self.id_prefix
            .as_deref()
            .is_none_or(|p| event.resource_id.starts_with(p))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
