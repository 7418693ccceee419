//! Store abstraction consumed by [`DistributedLock`](super::locks::DistributedLock).
//!
//! The lock needs exactly three atomic operations from its backing store.
//! [`RedisLockStore`] runs them as Lua scripts; the in-process
//! [`MemoryLockStore`](super::memory::MemoryLockStore) mirrors the same
//! semantics for tests.

use async_trait::async_trait;
use fred::interfaces::LuaInterface;
use tracing::trace;

use super::error::LockError;
use super::scripts;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of an acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now holds the lock `count` times.
    Acquired { count: u64 },
    /// A different holder owns the lock; nothing was changed.
    Contended,
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired { .. })
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The caller held nothing under this key (never acquired, already
    /// released, or the lease expired).
    NotHeld,
    /// One level of reentrancy was released; the caller still holds the lock.
    StillHeld,
    /// The count reached zero and the key was deleted.
    Released,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Atomic primitives backing a reentrant lease lock.
///
/// Every method must be indivisible with respect to every other call on the
/// same key: no other client may observe or act on an intermediate state.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create or increment `holder_id`'s entry when the key is free or
    /// already held by `holder_id`, then set the key's TTL to `lease_secs`.
    async fn acquire(
        &self,
        key: &str,
        holder_id: &str,
        lease_secs: u64,
    ) -> Result<AcquireOutcome, LockError>;

    /// Decrement `holder_id`'s entry, deleting the whole key at zero.
    async fn release(&self, key: &str, holder_id: &str) -> Result<ReleaseOutcome, LockError>;

    /// Refresh the key's TTL to `lease_secs` if `holder_id` still has an
    /// entry.  Returns `false` when the entry is gone.
    async fn renew(&self, key: &str, holder_id: &str, lease_secs: u64) -> Result<bool, LockError>;
}

// ---------------------------------------------------------------------------
// Redis / KeyDB
// ---------------------------------------------------------------------------

/// [`LockStore`] backed by a KeyDB / Redis connection pool.
#[derive(Clone)]
pub struct RedisLockStore {
    pool: fred::clients::Pool,
}

impl RedisLockStore {
    pub fn new(pool: fred::clients::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn acquire(
        &self,
        key: &str,
        holder_id: &str,
        lease_secs: u64,
    ) -> Result<AcquireOutcome, LockError> {
        let reply: i64 = self
            .pool
            .eval(
                scripts::ACQUIRE,
                vec![key.to_string()],
                vec![holder_id.to_string(), lease_secs.to_string()],
            )
            .await?;
        trace!(%key, %holder_id, reply, "acquire script");
        acquire_outcome(reply)
    }

    async fn release(&self, key: &str, holder_id: &str) -> Result<ReleaseOutcome, LockError> {
        let reply: Option<i64> = self
            .pool
            .eval(
                scripts::RELEASE,
                vec![key.to_string()],
                vec![holder_id.to_string()],
            )
            .await?;
        trace!(%key, %holder_id, ?reply, "release script");
        release_outcome(reply)
    }

    async fn renew(&self, key: &str, holder_id: &str, lease_secs: u64) -> Result<bool, LockError> {
        let reply: i64 = self
            .pool
            .eval(
                scripts::RENEW,
                vec![key.to_string()],
                vec![holder_id.to_string(), lease_secs.to_string()],
            )
            .await?;
        trace!(%key, %holder_id, reply, "renew script");
        Ok(reply == 1)
    }
}

/// Interpret the acquire script's reply: the post-increment count, or 0.
fn acquire_outcome(reply: i64) -> Result<AcquireOutcome, LockError> {
    match reply {
        0 => Ok(AcquireOutcome::Contended),
        n if n > 0 => Ok(AcquireOutcome::Acquired { count: n as u64 }),
        n => Err(LockError::UnexpectedReply(format!("acquire returned {n}"))),
    }
}

/// Interpret the release script's reply: nil, 0, or the `DEL` count.
fn release_outcome(reply: Option<i64>) -> Result<ReleaseOutcome, LockError> {
    match reply {
        None => Ok(ReleaseOutcome::NotHeld),
        Some(0) => Ok(ReleaseOutcome::StillHeld),
        Some(n) if n > 0 => Ok(ReleaseOutcome::Released),
        Some(n) => Err(LockError::UnexpectedReply(format!("release returned {n}"))),
    }
}
