//! Reentrant distributed lock with lease renewal, backed by KeyDB / Redis.
//!
//! The lock state is a HASH of holder id -> reentrancy count with a TTL,
//! mutated only through Lua scripts so that check and update are one atomic
//! step on the server.  [`coordination::DistributedLock`] layers blocking
//! acquisition, reentrancy and a lease watchdog on top.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lockkeeper::coordination::{DistributedLock, RedisLockStore};
//!
//! # async fn example(pool: fred::clients::Pool) {
//! let store = Arc::new(RedisLockStore::new(pool));
//! let lock = DistributedLock::new(store, "orders:42").with_lease_secs(10);
//!
//! lock.lock().await;
//! // critical section; the watchdog keeps the lease alive
//! lock.unlock().await;
//! # }
//! ```
//!
//! The crate also ships the `lockkeeper` binary: an HTTP inventory service
//! whose instances share one stock counter under the lock.

pub mod config;
pub mod coordination;
pub mod health;
pub mod http;
pub mod inventory;
pub mod metrics;

use std::sync::Arc;

use crate::config::Config;
use crate::inventory::Inventory;
use crate::metrics::MetricsRegistry;

/// Global state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub redis: fred::clients::Pool,
    pub metrics: MetricsRegistry,
    pub inventory: Arc<Inventory>,
}
