//! In-process [`LockStore`] with the same semantics as the Lua scripts.
//!
//! Each operation runs inside one mutex critical section, which gives it the
//! same all-or-nothing visibility an `EVAL` has on the server.  Lease
//! deadlines use [`tokio::time::Instant`] so tests can drive expiry with a
//! paused clock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::error::LockError;
use super::store::{AcquireOutcome, LockStore, ReleaseOutcome};

#[derive(Debug)]
struct Entry {
    holders: HashMap<String, u64>,
    expires_at: Instant,
}

/// HashMap-backed lock store for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of holder id -> reentrancy count for a live key.
    pub fn holders(&self, key: &str) -> HashMap<String, u64> {
        let mut entries = self.entries();
        purge_expired(&mut entries, key);
        entries
            .get(key)
            .map(|e| e.holders.clone())
            .unwrap_or_default()
    }

    /// Remaining lease on a live key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries();
        purge_expired(&mut entries, key);
        entries
            .get(key)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }

    /// Drop a key regardless of holder, as an eviction or operator `DEL` would.
    pub fn evict(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lease_deadline(lease_secs: u64) -> Result<Instant, LockError> {
    Instant::now()
        .checked_add(Duration::from_secs(lease_secs))
        .ok_or_else(|| LockError::Backend(format!("lease of {lease_secs}s is out of range")))
}

fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries
        .get(key)
        .is_some_and(|e| e.expires_at <= Instant::now())
    {
        entries.remove(key);
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn acquire(
        &self,
        key: &str,
        holder_id: &str,
        lease_secs: u64,
    ) -> Result<AcquireOutcome, LockError> {
        let mut entries = self.entries();
        purge_expired(&mut entries, key);
        let expires_at = lease_deadline(lease_secs)?;

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            holders: HashMap::new(),
            expires_at,
        });
        if !entry.holders.is_empty() && !entry.holders.contains_key(holder_id) {
            return Ok(AcquireOutcome::Contended);
        }

        let count = entry.holders.entry(holder_id.to_string()).or_insert(0);
        *count += 1;
        entry.expires_at = expires_at;
        Ok(AcquireOutcome::Acquired { count: *count })
    }

    async fn release(&self, key: &str, holder_id: &str) -> Result<ReleaseOutcome, LockError> {
        let mut entries = self.entries();
        purge_expired(&mut entries, key);

        let Some(entry) = entries.get_mut(key) else {
            return Ok(ReleaseOutcome::NotHeld);
        };
        let Some(count) = entry.holders.get_mut(holder_id) else {
            return Ok(ReleaseOutcome::NotHeld);
        };

        *count -= 1;
        if *count == 0 {
            entries.remove(key);
            Ok(ReleaseOutcome::Released)
        } else {
            Ok(ReleaseOutcome::StillHeld)
        }
    }

    async fn renew(&self, key: &str, holder_id: &str, lease_secs: u64) -> Result<bool, LockError> {
        let mut entries = self.entries();
        purge_expired(&mut entries, key);

        match entries.get_mut(key) {
            Some(entry) if entry.holders.contains_key(holder_id) => {
                entry.expires_at = lease_deadline(lease_secs)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
