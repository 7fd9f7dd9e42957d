//! Error types for store mutations.
//!
//! Reads never fail: absence is `Option`/empty `Vec` on the read APIs.
//! Mutations return [`StoreError`], and every variant is recoverable
//! by the caller; nothing in this crate aborts the process.

/// Error raised by a store mutation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store refuses writes, normally because the runtime is
    /// shutting down.
    #[error("storage unavailable: {reason}")]
    StorageUnavailable {
        /// Human-readable explanation of why the store is unavailable.
        reason: String,
    },

    /// A caller-supplied argument violated a store constraint.
    #[error("{message}")]
    InvalidArgument {
        /// What was wrong with the argument.
        message: String,
    },
}

impl StoreError {
    /// Build a [`StoreError::StorageUnavailable`].
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            reason: reason.into(),
        }
    }

    /// Build a [`StoreError::InvalidArgument`].
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
