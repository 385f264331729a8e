//! Server configuration.

use std::time::Duration;

use ratecache_core::{CacheConfig, OpenExchangeRatesConfig};

/// Where snapshots and the access log live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local; lost on restart.
    Memory,
    /// PostgreSQL at the given URL.
    Postgres { url: String },
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Selected backend.
    pub backend: StorageBackend,
    /// Maximum pooled database connections.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            max_connections: 5,
        }
    }
}

/// Periodic sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between scheduled refreshes. `None` disables the scheduler.
    pub interval: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(60 * 60)),
        }
    }
}

/// Main server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub listen_addr: String,
    /// Listen port.
    pub listen_port: u16,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Upstream provider configuration.
    pub provider: OpenExchangeRatesConfig,
    /// Cache configuration.
    pub cache: CacheConfig,
    /// Periodic sync configuration.
    pub sync: SyncConfig,
    /// Take the caller address from `X-Forwarded-For`.
    pub trust_proxy: bool,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
            storage: StorageConfig::default(),
            provider: OpenExchangeRatesConfig::default(),
            cache: CacheConfig::default(),
            sync: SyncConfig::default(),
            trust_proxy: true,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(port) = parse(&lookup, "PORT")? {
            config.listen_port = port;
        }

        let memory_requested = lookup("STORAGE_BACKEND")
            .map(|b| b.eq_ignore_ascii_case("memory"))
            .unwrap_or(false);
        if let Some(url) = lookup("DATABASE_URL") {
            if !memory_requested {
                config.storage.backend = StorageBackend::Postgres { url };
            }
        }

        if let Some(max) = parse(&lookup, "DB_MAX_CONNECTIONS")? {
            config.storage.max_connections = max;
        }

        if let Some(url) = lookup("OPEN_EXCHANGE_RATES_BASE_URL") {
            config.provider.base_url = url;
        }

        if let Some(key) = lookup("OPEN_EXCHANGE_RATES_API_KEY") {
            config.provider.api_key = key;
        }

        if let Some(attempts) = parse(&lookup, "FETCH_MAX_ATTEMPTS")? {
            config.provider.retry.max_attempts = attempts;
        }

        if let Some(ms) = parse::<u64, _>(&lookup, "FETCH_TIMEOUT_MS")? {
            config.provider.timeout = Duration::from_millis(ms);
        }

        if let Some(ttl_ms) = parse(&lookup, "CURRENCY_RATE_CACHE_DURATION")? {
            config.cache.ttl_ms = ttl_ms;
        }

        if let Some(concurrency) = parse(&lookup, "REFRESH_WORKER_CONCURRENCY")? {
            config.cache.refresh_worker_concurrency = concurrency;
        }

        if let Some(ms) = parse::<u64, _>(&lookup, "REVALIDATION_TIMEOUT_MS")? {
            config.cache.revalidation_timeout = Some(Duration::from_millis(ms));
        }

        if let Some(mins) = parse::<u64, _>(&lookup, "SYNC_INTERVAL_MINS")? {
            config.sync.interval = (mins > 0).then(|| Duration::from_secs(mins * 60));
        }

        if let Some(trust) = parse(&lookup, "TRUST_PROXY")? {
            config.trust_proxy = trust;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_port == 0 {
            return Err("Listen port cannot be 0".to_string());
        }

        if let StorageBackend::Postgres { url } = &self.storage.backend {
            if url.is_empty() {
                return Err("Database URL cannot be empty".to_string());
            }
        }

        if self.storage.max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        if self.provider.api_key.is_empty() {
            return Err("OPEN_EXCHANGE_RATES_API_KEY must be set".to_string());
        }

        if self.provider.retry.max_attempts == 0 {
            return Err("Fetch attempts must be at least 1".to_string());
        }

        if self.provider.timeout.is_zero() {
            return Err("Fetch timeout cannot be 0".to_string());
        }

        if self.cache.refresh_worker_concurrency == 0 {
            return Err("Refresh worker concurrency must be at least 1".to_string());
        }

        if matches!(self.cache.revalidation_timeout, Some(t) if t.is_zero()) {
            return Err("Revalidation timeout cannot be 0".to_string());
        }

        Ok(())
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, String>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("Invalid value for {key}: {raw}")),
        None => Ok(None),
    }
}
