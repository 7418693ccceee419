//! Reentrant distributed lock with a background lease watchdog.
//!
//! The lock lives in the store as a HASH of holder id -> reentrancy count
//! with a TTL.  Every acquire and every renewal tick resets the TTL to the
//! lease, so a crashed holder frees the lock after at most one lease.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::LockError;
use super::store::{AcquireOutcome, LockStore, ReleaseOutcome};

/// Lease applied when the caller does not override it.
pub const DEFAULT_LEASE_SECS: u64 = 5;

/// Delay between attempts in the blocking acquire loops.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Longest lease accepted.  Keeps every lease deadline representable.
pub const MAX_LEASE_SECS: u64 = 365 * 24 * 60 * 60;

/// Handle on the running watchdog task.
struct Renewal {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Renewal {
    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

/// A named lock shared by every process pointing at the same store.
///
/// Each instance gets its own random holder id, so acquiring twice through
/// the same instance re-enters the lock while a second instance (in this
/// process or any other) contends for it.
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    key: String,
    holder_id: String,
    lease_secs: u64,
    retry_interval: Duration,
    renewal: Mutex<Option<Renewal>>,
    generations: AtomicU64,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            holder_id: new_holder_id(),
            lease_secs: DEFAULT_LEASE_SECS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            renewal: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    /// Builder form of [`set_lease_secs`](Self::set_lease_secs).
    pub fn with_lease_secs(mut self, secs: u64) -> Self {
        self.set_lease_secs(secs);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Override the lease.  Takes effect on the next acquire; a running
    /// watchdog keeps the lease it was started with.
    ///
    /// A zero lease would make the store delete the key on the spot, so it
    /// is raised to one second.  Leases above [`MAX_LEASE_SECS`] are capped.
    pub fn set_lease_secs(&mut self, secs: u64) {
        if secs == 0 {
            warn!(key = %self.key, "lease of 0s requested, using 1s");
        } else if secs > MAX_LEASE_SECS {
            warn!(key = %self.key, secs, max = MAX_LEASE_SECS, "lease too long, capping");
        }
        self.lease_secs = secs.clamp(1, MAX_LEASE_SECS);
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn lease_secs(&self) -> u64 {
        self.lease_secs
    }

    /// Whether a watchdog task is currently extending this holder's lease.
    pub fn is_renewing(&self) -> bool {
        self.renewal_slot().as_ref().is_some_and(Renewal::is_active)
    }

    // -----------------------------------------------------------------------
    // Acquire
    // -----------------------------------------------------------------------

    /// Single acquire attempt that reports store failures to the caller.
    pub async fn try_acquire(&self) -> Result<bool, LockError> {
        let outcome = self
            .store
            .acquire(&self.key, &self.holder_id, self.lease_secs)
            .await?;

        match outcome {
            AcquireOutcome::Acquired { count } => {
                debug!(key = %self.key, holder_id = %self.holder_id, count, "lock acquired");
                self.ensure_renewal(count == 1);
                Ok(true)
            }
            AcquireOutcome::Contended => {
                debug!(key = %self.key, holder_id = %self.holder_id, "lock held by another holder");
                Ok(false)
            }
        }
    }

    /// Single non-blocking acquire attempt.
    ///
    /// Store errors are logged and reported as `false`: an ambiguous outcome
    /// is never treated as ownership.
    pub async fn try_lock(&self) -> bool {
        match self.try_acquire().await {
            Ok(acquired) => acquired,
            Err(e) => {
                error!(key = %self.key, error = %e, "try_lock failed");
                false
            }
        }
    }

    /// Poll until the lock is acquired.  Never gives up.
    pub async fn lock(&self) {
        loop {
            if self.try_lock().await {
                return;
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Poll until the lock is acquired or `timeout` elapses.
    pub async fn lock_with_timeout(&self, timeout: Duration) -> Result<(), LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_lock().await {
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(key = %self.key, ?timeout, "timed out waiting for lock");
                return Err(LockError::Timeout {
                    key: self.key.clone(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.retry_interval.min(remaining)).await;
        }
    }

    /// Poll until the lock is acquired or `cancel` fires.
    ///
    /// Cancellation is only observed between attempts, so an in-flight
    /// acquire is never abandoned with an unknown outcome.
    pub async fn lock_until_cancelled(&self, cancel: &CancellationToken) -> Result<(), LockError> {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if self.try_lock().await {
                return Ok(());
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.retry_interval) => {}
            }
        }
        debug!(key = %self.key, "lock wait cancelled");
        Err(LockError::Cancelled {
            key: self.key.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Release
    // -----------------------------------------------------------------------

    /// Release one level of reentrancy, reporting store failures.
    pub async fn release(&self) -> Result<ReleaseOutcome, LockError> {
        // Another task sharing this instance may re-acquire while the release
        // is in flight; only the watchdog seen here may be stopped.
        let generation = self.current_generation();
        let outcome = self.store.release(&self.key, &self.holder_id).await?;
        match outcome {
            ReleaseOutcome::Released => {
                self.stop_renewal_if(generation);
                debug!(key = %self.key, holder_id = %self.holder_id, "lock released");
            }
            ReleaseOutcome::StillHeld => {
                debug!(key = %self.key, holder_id = %self.holder_id, "reentrant release, still held");
            }
            ReleaseOutcome::NotHeld => {
                self.stop_renewal_if(generation);
                debug!(key = %self.key, holder_id = %self.holder_id, "unlock: not held by this holder");
            }
        }
        Ok(outcome)
    }

    /// Release one level of reentrancy.
    ///
    /// Releasing a lock this instance does not hold is a no-op.  Store errors
    /// are logged; the lease reclaims the lock if the release never lands.
    pub async fn unlock(&self) {
        if let Err(e) = self.release().await {
            error!(key = %self.key, error = %e, "unlock failed");
        }
    }

    /// Stop the watchdog without touching the store.  The lock, if held,
    /// expires after the current lease.
    pub fn shutdown(&self) {
        self.stop_renewal();
    }

    // -----------------------------------------------------------------------
    // Watchdog
    // -----------------------------------------------------------------------

    /// Start a watchdog unless one is already running.  `restart` replaces a
    /// live one: the store just reported a fresh 0 -> 1 acquisition, so any
    /// existing task belongs to a lease that has already lapsed.
    fn ensure_renewal(&self, restart: bool) {
        let mut slot = self.renewal_slot();
        if let Some(existing) = slot.as_ref() {
            if existing.is_active() && !restart {
                return;
            }
            existing.cancel.cancel();
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(renew_loop(
            Arc::clone(&self.store),
            self.key.clone(),
            self.holder_id.clone(),
            self.lease_secs,
            cancel.clone(),
        ));
        *slot = Some(Renewal {
            generation,
            cancel,
            handle,
        });
    }

    fn stop_renewal(&self) {
        if let Some(renewal) = self.renewal_slot().take() {
            renewal.cancel.cancel();
        }
    }

    fn current_generation(&self) -> Option<u64> {
        self.renewal_slot().as_ref().map(|r| r.generation)
    }

    /// Stop the watchdog only if it is still the one started as `generation`.
    fn stop_renewal_if(&self, generation: Option<u64>) {
        let mut slot = self.renewal_slot();
        if generation.is_some() && slot.as_ref().map(|r| r.generation) == generation {
            if let Some(renewal) = slot.take() {
                renewal.cancel.cancel();
            }
        }
    }

    fn renewal_slot(&self) -> MutexGuard<'_, Option<Renewal>> {
        self.renewal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DistributedLock {
    fn drop(&mut self) {
        let slot = self
            .renewal
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(renewal) = slot.take() {
            renewal.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("holder_id", &self.holder_id)
            .field("lease_secs", &self.lease_secs)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

/// 128-bit random id rendered as 32 hex chars, no separators.
fn new_holder_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A third of the lease, so two renewals land before a healthy lease lapses.
pub fn renewal_period(lease_secs: u64) -> Duration {
    Duration::from_secs(lease_secs.max(1)) / 3
}

/// Extend the lease every [`renewal_period`] until the holder's entry
/// disappears or `cancel` fires.
async fn renew_loop(
    store: Arc<dyn LockStore>,
    key: String,
    holder_id: String,
    lease_secs: u64,
    cancel: CancellationToken,
) {
    let period = renewal_period(lease_secs);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(%key, %holder_id, ?period, "lease watchdog started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(%key, %holder_id, "lease watchdog cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        match store.renew(&key, &holder_id, lease_secs).await {
            Ok(true) => debug!(%key, %holder_id, lease_secs, "lease renewed"),
            Ok(false) => {
                info!(%key, %holder_id, "lock no longer held, lease watchdog exiting");
                return;
            }
            Err(e) => warn!(%key, %holder_id, error = %e, "lease renewal failed"),
        }
    }
}
