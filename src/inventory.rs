//! Stock counter guarded by the distributed lock.
//!
//! Several service processes share one stock key.  Each consume request
//! takes the lock, reads the stock, writes it back decremented and releases
//! the lock, so no two processes ever sell the same unit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fred::clients::Pool;
use fred::interfaces::KeysInterface;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::{InventoryConfig, LockConfig};
use crate::coordination::{DistributedLock, LockStore};
use crate::metrics::{ConsumeStatus, Metrics};

/// Plain integer reads and writes on the stock key.  Atomicity comes from
/// the distributed lock, not from this store.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Current value, `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    async fn set(&self, key: &str, value: i64) -> Result<()>;
}

/// [`StockStore`] on a shared KeyDB / Redis pool.
#[derive(Clone)]
pub struct RedisStockStore {
    pool: Pool,
}

impl RedisStockStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockStore for RedisStockStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        self.pool
            .get(key)
            .await
            .with_context(|| format!("GET {key}"))
    }

    async fn set(&self, key: &str, value: i64) -> Result<()> {
        let _: () = self
            .pool
            .set(key, value, None, None, false)
            .await
            .with_context(|| format!("SET {key}"))?;
        Ok(())
    }
}

/// Result of one consume request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConsumeOutcome {
    /// One unit was taken; `remaining` units are left.
    Consumed { remaining: i64 },
    /// The stock was already exhausted.
    SoldOut,
}

pub struct Inventory {
    stock: Arc<dyn StockStore>,
    locks: Arc<dyn LockStore>,
    config: InventoryConfig,
    lock_config: LockConfig,
    metrics: Arc<Metrics>,
    requests: AtomicU64,
}

impl Inventory {
    pub fn new(
        stock: Arc<dyn StockStore>,
        locks: Arc<dyn LockStore>,
        config: InventoryConfig,
        lock_config: LockConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            stock,
            locks,
            config,
            lock_config,
            metrics,
            requests: AtomicU64::new(0),
        }
    }

    /// Overwrite the stock with the configured initial amount.
    pub async fn seed(&self) -> Result<()> {
        self.stock
            .set(&self.config.stock_key, self.config.initial_stock)
            .await
            .context("seed initial stock")?;
        info!(
            stock_key = %self.config.stock_key,
            stock = self.config.initial_stock,
            "inventory seeded"
        );
        Ok(())
    }

    /// Current stock; a missing key counts as zero.
    pub async fn remaining(&self) -> Result<i64> {
        let stock = self.stock.get(&self.config.stock_key).await?;
        Ok(stock.unwrap_or(0))
    }

    /// Number of consume requests handled by this process.
    pub fn requests_served(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Take one unit of stock under the distributed lock.
    #[instrument(skip(self), fields(lock_key = %self.config.lock_key))]
    pub async fn consume(&self) -> Result<ConsumeOutcome> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let lock = DistributedLock::new(Arc::clone(&self.locks), self.config.lock_key.clone())
            .with_lease_secs(self.lock_config.lease_secs)
            .with_retry_interval(self.lock_config.retry_interval());

        let started = Instant::now();
        match self.lock_config.acquire_timeout() {
            Some(timeout) => {
                if let Err(e) = lock.lock_with_timeout(timeout).await {
                    self.metrics.lock_timeouts.inc();
                    self.metrics.record_consume(ConsumeStatus::LockTimeout);
                    return Err(e.into());
                }
            }
            None => lock.lock().await,
        }
        self.metrics.lock_acquisitions.inc();
        self.metrics
            .lock_wait_seconds
            .observe(started.elapsed().as_secs_f64());

        let result = self.take_one().await;
        lock.unlock().await;

        match &result {
            Ok(ConsumeOutcome::Consumed { remaining }) => {
                self.metrics.stock_remaining.set(*remaining);
                self.metrics.record_consume(ConsumeStatus::Consumed);
            }
            Ok(ConsumeOutcome::SoldOut) => self.metrics.record_consume(ConsumeStatus::SoldOut),
            Err(_) => self.metrics.record_consume(ConsumeStatus::Error),
        }
        result
    }

    /// Read-modify-write of the stock.  Callers must hold the lock.
    async fn take_one(&self) -> Result<ConsumeOutcome> {
        let stock = self.remaining().await?;
        if stock <= 0 {
            info!(stock_key = %self.config.stock_key, "no more stock");
            return Ok(ConsumeOutcome::SoldOut);
        }

        let remaining = stock - 1;
        self.stock
            .set(&self.config.stock_key, remaining)
            .await
            .context("write decremented stock")?;
        debug!(stock_key = %self.config.stock_key, remaining, "consumed one unit");
        Ok(ConsumeOutcome::Consumed { remaining })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::coordination::MemoryLockStore;
    use crate::metrics::MetricsRegistry;

    #[derive(Default)]
    struct MapStock {
        values: Mutex<HashMap<String, i64>>,
        fail_reads: bool,
    }

    #[async_trait]
    impl StockStore for MapStock {
        async fn get(&self, key: &str) -> Result<Option<i64>> {
            anyhow::ensure!(!self.fail_reads, "connection reset");
            Ok(self.values.lock().unwrap().get(key).copied())
        }

        async fn set(&self, key: &str, value: i64) -> Result<()> {
            self.values.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }
    }

    fn inventory(stock: Arc<MapStock>, locks: Arc<MemoryLockStore>, initial: i64) -> Inventory {
        let config = InventoryConfig {
            initial_stock: initial,
            ..InventoryConfig::default()
        };
        Inventory::new(
            stock,
            locks,
            config,
            LockConfig::default(),
            Arc::clone(&MetricsRegistry::new().metrics),
        )
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let consumed = serde_json::to_value(ConsumeOutcome::Consumed { remaining: 7 }).unwrap();
        assert_eq!(consumed["status"], "consumed");
        assert_eq!(consumed["remaining"], 7);

        let sold_out = serde_json::to_value(ConsumeOutcome::SoldOut).unwrap();
        assert_eq!(sold_out["status"], "sold_out");
    }

    #[tokio::test]
    async fn sells_down_to_zero_then_reports_sold_out() {
        let locks = Arc::new(MemoryLockStore::new());
        let inv = inventory(Arc::new(MapStock::default()), locks.clone(), 2);
        inv.seed().await.unwrap();

        assert_eq!(
            inv.consume().await.unwrap(),
            ConsumeOutcome::Consumed { remaining: 1 }
        );
        assert_eq!(
            inv.consume().await.unwrap(),
            ConsumeOutcome::Consumed { remaining: 0 }
        );
        assert_eq!(inv.consume().await.unwrap(), ConsumeOutcome::SoldOut);
        assert_eq!(inv.consume().await.unwrap(), ConsumeOutcome::SoldOut);

        assert_eq!(inv.remaining().await.unwrap(), 0);
        assert_eq!(inv.requests_served(), 4);
        assert!(locks.holders(&InventoryConfig::default().lock_key).is_empty());
    }

    #[tokio::test]
    async fn missing_stock_key_is_sold_out() {
        let inv = inventory(
            Arc::new(MapStock::default()),
            Arc::new(MemoryLockStore::new()),
            5,
        );
        assert_eq!(inv.remaining().await.unwrap(), 0);
        assert_eq!(inv.consume().await.unwrap(), ConsumeOutcome::SoldOut);
    }

    #[tokio::test]
    async fn store_error_still_releases_lock() {
        let locks = Arc::new(MemoryLockStore::new());
        let stock = Arc::new(MapStock {
            fail_reads: true,
            ..MapStock::default()
        });
        let inv = inventory(stock, locks.clone(), 5);

        assert!(inv.consume().await.is_err());
        assert!(locks.holders(&InventoryConfig::default().lock_key).is_empty());
        assert_eq!(inv.requests_served(), 1);
    }
}
