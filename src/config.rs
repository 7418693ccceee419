use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    #[serde(default)]
    pub lock: LockConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

// ---------------------------------------------------------------------------
// KeyDB / Redis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Connection string (e.g. `redis://localhost:6379`).
    pub endpoint: String,
    /// Enable TLS for the connection.
    #[serde(default)]
    pub tls: bool,
    /// Name of the environment variable that holds the auth token.
    #[serde(default = "default_redis_auth_env")]
    pub auth_token_env: String,
    /// Number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_redis_auth_env() -> String {
    "REDIS_AUTH_TOKEN".to_string()
}

fn default_pool_size() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Lock behaviour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Lease (seconds) applied on every acquire and renewal.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Delay (milliseconds) between acquire attempts while waiting.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Give up waiting after this many seconds.  Unset means wait forever.
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            retry_interval_ms: default_retry_interval_ms(),
            acquire_timeout_secs: None,
        }
    }
}

impl LockConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_secs.map(Duration::from_secs)
    }
}

fn default_lease_secs() -> u64 {
    crate::coordination::locks::DEFAULT_LEASE_SECS
}

fn default_retry_interval_ms() -> u64 {
    20
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:8888`).
    pub http_listen: String,
}

impl ServerConfig {
    /// Port of `http_listen`, reported back to clients by `/consume`.
    pub fn port(&self) -> Option<u16> {
        self.http_listen.parse::<SocketAddr>().ok().map(|addr| addr.port())
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    /// Key holding the remaining stock as an integer.
    #[serde(default = "default_stock_key")]
    pub stock_key: String,
    /// Name of the distributed lock guarding the stock.
    #[serde(default = "default_lock_key")]
    pub lock_key: String,
    /// Stock written at startup when `seed_on_start` is set.
    #[serde(default = "default_initial_stock")]
    pub initial_stock: i64,
    /// Overwrite the stock key with `initial_stock` on startup.
    #[serde(default = "bool_true")]
    pub seed_on_start: bool,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            stock_key: default_stock_key(),
            lock_key: default_lock_key(),
            initial_stock: default_initial_stock(),
            seed_on_start: true,
        }
    }
}

fn default_stock_key() -> String {
    "lockkeeper:inventory:apple".to_string()
}

fn default_lock_key() -> String {
    "lockkeeper:lock:inventory:apple".to_string()
}

fn default_initial_stock() -> i64 {
    500
}

fn bool_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(config.redis.pool_size > 0, "redis.pool_size must be at least 1");
    anyhow::ensure!(
        config.server.port().is_some(),
        "server.http_listen must be a socket address, got {:?}",
        config.server.http_listen
    );
    anyhow::ensure!(config.lock.lease_secs > 0, "lock.lease_secs must be at least 1");
    anyhow::ensure!(
        config.lock.retry_interval_ms > 0,
        "lock.retry_interval_ms must be at least 1"
    );
    anyhow::ensure!(
        config.lock.acquire_timeout_secs != Some(0),
        "lock.acquire_timeout_secs must be positive when set"
    );
    anyhow::ensure!(
        !config.inventory.stock_key.is_empty() && !config.inventory.lock_key.is_empty(),
        "inventory keys must not be empty"
    );
    anyhow::ensure!(
        config.inventory.stock_key != config.inventory.lock_key,
        "inventory.stock_key and inventory.lock_key must differ"
    );
    anyhow::ensure!(
        config.inventory.initial_stock >= 0,
        "inventory.initial_stock must not be negative"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let file = write_config(
            r#"
redis:
  endpoint: redis://localhost:6379
server:
  http_listen: 127.0.0.1:8888
"#,
        );
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.redis.pool_size, 4);
        assert!(!config.redis.tls);
        assert_eq!(config.lock.lease_secs, 5);
        assert_eq!(config.lock.retry_interval(), Duration::from_millis(20));
        assert_eq!(config.lock.acquire_timeout(), None);
        assert_eq!(config.inventory.initial_stock, 500);
        assert!(config.inventory.seed_on_start);
    }

    #[test]
    fn overrides_are_applied() {
        let file = write_config(
            r#"
redis:
  endpoint: rediss://cache.internal:6380
  tls: true
  pool_size: 2
lock:
  lease_secs: 9
  retry_interval_ms: 50
  acquire_timeout_secs: 3
server:
  http_listen: 0.0.0.0:9999
inventory:
  stock_key: stock
  lock_key: stock:lock
  initial_stock: 10
  seed_on_start: false
"#,
        );
        let config = load_config(file.path()).unwrap();

        assert!(config.redis.tls);
        assert_eq!(config.lock.lease_secs, 9);
        assert_eq!(config.lock.acquire_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.server.http_listen, "0.0.0.0:9999");
        assert_eq!(config.server.port(), Some(9999));
        assert_eq!(config.inventory.lock_key, "stock:lock");
        assert!(!config.inventory.seed_on_start);
    }

    #[test]
    fn zero_lease_is_rejected() {
        let file = write_config(
            r#"
redis:
  endpoint: redis://localhost
lock:
  lease_secs: 0
server:
  http_listen: 127.0.0.1:8888
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("lease_secs"));
    }

    #[test]
    fn listen_without_port_is_rejected() {
        let file = write_config(
            r#"
redis:
  endpoint: redis://localhost
server:
  http_listen: localhost
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("http_listen"));
    }

    #[test]
    fn shared_stock_and_lock_key_is_rejected() {
        let file = write_config(
            r#"
redis:
  endpoint: redis://localhost
server:
  http_listen: 127.0.0.1:8888
inventory:
  stock_key: same
  lock_key: same
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config("/nonexistent/lockkeeper.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/lockkeeper.yaml"));
    }
}
