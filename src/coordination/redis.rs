//! KeyDB / Redis client pool creation.
//!
//! Builds a [`fred::clients::Pool`] configured from
//! [`crate::config::RedisConfig`], optionally enabling TLS via `rustls` and
//! reading the auth token from an environment variable.

use anyhow::{Context, Result};
use fred::clients::Pool;
use fred::interfaces::ClientLike;
use fred::types::config::{ReconnectPolicy, ServerConfig, TlsConnector};
use fred::types::Builder;

use crate::config::RedisConfig;

/// Build an unconnected pool from the configuration.
///
/// Connection happens in [`create_pool`]; tests use this directly to get a
/// pool handle without a live server.
pub fn build_pool(config: &RedisConfig) -> Result<Pool> {
    let auth_token = std::env::var(&config.auth_token_env).ok();

    let endpoint = config
        .endpoint
        .trim_start_matches("rediss://")
        .trim_start_matches("redis://");
    let (host, port) = parse_host_port(endpoint)?;

    let mut fred_config = fred::types::config::Config {
        server: ServerConfig::new_centralized(host, port),
        ..fred::types::config::Config::default()
    };

    if config.tls {
        fred_config.tls = Some(TlsConnector::default_rustls()?.into());
    }

    if let Some(ref token) = auth_token {
        fred_config.password = Some(token.clone());
    }

    let mut builder = Builder::from_config(fred_config);

    // Exponential reconnect: initial 0ms, base 100ms, max 30s, factor 2.
    builder.set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2));

    builder
        .build_pool(config.pool_size)
        .context("failed to build Redis connection pool")
}

/// Create a connection pool and verify it with a `PING` before returning.
pub async fn create_pool(config: &RedisConfig) -> Result<Pool> {
    let pool = build_pool(config)?;

    pool.init().await.context("failed to connect to Redis")?;

    let _: String = pool
        .ping(None)
        .await
        .context("Redis PING failed after connect")?;

    tracing::info!(
        endpoint = %config.endpoint,
        tls = config.tls,
        pool_size = config.pool_size,
        "Redis pool created and verified"
    );

    Ok(pool)
}

/// Parse a `host:port` string.  If the port is omitted, defaults to `6379`.
pub fn parse_host_port(endpoint: &str) -> Result<(&str, u16)> {
    // Strip any trailing path segments (e.g. a `/0` database suffix).
    let endpoint = endpoint.split('/').next().unwrap_or(endpoint);

    if let Some((host, port_str)) = endpoint.rsplit_once(':') {
        let port: u16 = port_str
            .parse()
            .with_context(|| format!("invalid port in endpoint: {endpoint}"))?;
        Ok((host, port))
    } else {
        Ok((endpoint, 6379))
    }
}
