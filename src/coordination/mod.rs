//! Distributed coordination backed by KeyDB (Redis-compatible).
//!
//! Provides a reentrant lease lock whose state lives entirely in the store,
//! so that any number of processes can contend for the same named resource.
//! All cross-process synchronisation goes through the store's atomic
//! scripted operations.

pub mod error;
pub mod locks;
pub mod memory;
pub mod redis;
pub mod scripts;
pub mod store;

pub use error::LockError;
pub use locks::DistributedLock;
pub use memory::MemoryLockStore;
pub use store::{AcquireOutcome, LockStore, RedisLockStore, ReleaseOutcome};
