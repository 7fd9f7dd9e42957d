//! Event bus error types.

/// Errors surfaced by [`crate::EventBus`] and [`crate::Subscription`].
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Requested replay point is older than the retained ring.
    ///
    /// The missed events are unrecoverable; the caller must resubscribe
    /// from the current point (or from `oldest_retained`).
    #[error("replay gap: seq {requested} requested, oldest retained is {oldest_retained}")]
    ReplayGapDetected {
        /// Sequence number the subscriber asked to resume from.
        requested: u64,
        /// Oldest sequence number still held in the replay ring.
        oldest_retained: u64,
    },

    /// Subscription was force-closed after its delivery queue stayed full
    /// past the slow-consumer threshold. The caller must resubscribe.
    #[error("subscription evicted: delivery queue stayed full past the slow-consumer threshold")]
    SlowConsumerEvicted,

    /// The bus has been shut down; no new subscriptions are accepted.
    #[error("event bus is shut down")]
    Closed,
}
