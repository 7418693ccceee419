//! Error types for distributed lock operations.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`LockStore`](super::store::LockStore) implementations
/// and the explicit-result methods on
/// [`DistributedLock`](super::locks::DistributedLock).
#[derive(Error, Debug)]
pub enum LockError {
    /// The store could not be reached or rejected the command.
    #[error("lock store error: {0}")]
    Backend(String),

    /// The store answered with a reply the lock scripts never produce.
    #[error("unexpected reply from lock store: {0}")]
    UnexpectedReply(String),

    /// `lock_with_timeout` gave up before the lock became free.
    #[error("timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },

    /// `lock_until_cancelled` observed its cancellation token.
    #[error("wait for lock {key} was cancelled")]
    Cancelled { key: String },
}

impl From<fred::error::Error> for LockError {
    fn from(err: fred::error::Error) -> Self {
        LockError::Backend(err.to_string())
    }
}
