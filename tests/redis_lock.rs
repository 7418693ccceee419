//! Lock scripts against a live Redis / KeyDB.
//!
//! Ignored by default.  Run with a server available:
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_lock -- --ignored
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fred::interfaces::{HashesInterface, KeysInterface};
use lockkeeper::config::RedisConfig;
use lockkeeper::coordination::redis::create_pool;
use lockkeeper::coordination::{
    AcquireOutcome, DistributedLock, LockStore, RedisLockStore, ReleaseOutcome,
};

async fn connect() -> fred::clients::Pool {
    let endpoint =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let config = RedisConfig {
        endpoint,
        tls: false,
        auth_token_env: "REDIS_AUTH_TOKEN".to_string(),
        pool_size: 2,
    };
    create_pool(&config).await.expect("connect to Redis")
}

fn unique_key(name: &str) -> String {
    format!("lockkeeper:test:{name}:{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn scripts_enforce_exclusivity_and_reentrancy() {
    let pool = connect().await;
    let store = RedisLockStore::new(pool.clone());
    let key = unique_key("scripts");

    assert_eq!(
        store.acquire(&key, "a", 5).await.unwrap(),
        AcquireOutcome::Acquired { count: 1 }
    );
    assert_eq!(
        store.acquire(&key, "a", 5).await.unwrap(),
        AcquireOutcome::Acquired { count: 2 }
    );
    assert_eq!(
        store.acquire(&key, "b", 5).await.unwrap(),
        AcquireOutcome::Contended
    );

    let fields: HashMap<String, i64> = pool.hgetall(&key).await.unwrap();
    assert_eq!(fields.get("a"), Some(&2));
    assert!(!fields.contains_key("b"));

    let ttl: i64 = pool.ttl(&key).await.unwrap();
    assert!((1..=5).contains(&ttl), "ttl was {ttl}");

    assert_eq!(store.release(&key, "b").await.unwrap(), ReleaseOutcome::NotHeld);
    assert_eq!(store.release(&key, "a").await.unwrap(), ReleaseOutcome::StillHeld);
    assert_eq!(store.release(&key, "a").await.unwrap(), ReleaseOutcome::Released);

    let exists: bool = pool.exists(&key).await.unwrap();
    assert!(!exists);
    assert_eq!(store.release(&key, "a").await.unwrap(), ReleaseOutcome::NotHeld);
    assert!(!store.renew(&key, "a", 5).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn lease_expires_without_renewal() {
    let pool = connect().await;
    let store = RedisLockStore::new(pool);
    let key = unique_key("expiry");

    assert!(store.acquire(&key, "crashed", 1).await.unwrap().is_acquired());
    assert!(!store.acquire(&key, "b", 1).await.unwrap().is_acquired());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(store.acquire(&key, "b", 1).await.unwrap().is_acquired());
    assert_eq!(store.release(&key, "b").await.unwrap(), ReleaseOutcome::Released);
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn watchdog_outlives_lease() {
    let pool = connect().await;
    let store: Arc<dyn LockStore> = Arc::new(RedisLockStore::new(pool));
    let key = unique_key("watchdog");

    let a = DistributedLock::new(Arc::clone(&store), key.clone()).with_lease_secs(2);
    let b = DistributedLock::new(Arc::clone(&store), key.clone());

    assert!(a.try_lock().await);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!b.try_lock().await);

    a.unlock().await;
    assert!(b.try_lock().await);
    b.unlock().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a running Redis"]
async fn concurrent_consumers_never_oversell() {
    use lockkeeper::config::{InventoryConfig, LockConfig};
    use lockkeeper::inventory::{ConsumeOutcome, Inventory, RedisStockStore};
    use lockkeeper::metrics::MetricsRegistry;

    let pool = connect().await;
    let store: Arc<dyn LockStore> = Arc::new(RedisLockStore::new(pool.clone()));
    let inventory_config = InventoryConfig {
        stock_key: unique_key("stock"),
        lock_key: unique_key("stock-lock"),
        initial_stock: 20,
        seed_on_start: true,
    };

    // Two "services" sharing the same keys, as two processes would.
    let services: Vec<Arc<Inventory>> = (0..2)
        .map(|_| {
            Arc::new(Inventory::new(
                Arc::new(RedisStockStore::new(pool.clone())),
                Arc::clone(&store),
                inventory_config.clone(),
                LockConfig::default(),
                Arc::clone(&MetricsRegistry::new().metrics),
            ))
        })
        .collect();
    services[0].seed().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..30 {
        let service = Arc::clone(&services[i % 2]);
        handles.push(tokio::spawn(async move { service.consume().await.unwrap() }));
    }

    let mut consumed = 0;
    let mut sold_out = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ConsumeOutcome::Consumed { .. } => consumed += 1,
            ConsumeOutcome::SoldOut => sold_out += 1,
        }
    }

    assert_eq!(consumed, 20);
    assert_eq!(sold_out, 10);
    assert_eq!(services[1].remaining().await.unwrap(), 0);
    assert_eq!(services[0].requests_served() + services[1].requests_served(), 30);

    let _: i64 = pool.del(&inventory_config.stock_key).await.unwrap();
}
