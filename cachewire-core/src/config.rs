//! Configuration types for the cache client

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the connection pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of connections opened at startup and kept for the pool's lifetime
    pub size: usize,
    /// How long `acquire` waits for a released connection
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for reconnection behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Enable automatic replacement of broken connections
    pub enabled: bool,

    /// Maximum delay between reconnect attempts
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given (zero-based) reconnect attempt
    #[must_use]
    pub fn delay_for(&self, base: Duration, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
        let millis = (base.as_millis() as f64 * factor).round();
        let cap = self.max_delay.as_millis() as f64;
        Duration::from_millis(millis.min(cap) as u64)
    }
}

/// Thresholds used to grade cache health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// PING round-trip above this is an issue
    pub latency: Duration,
    /// PING round-trip above this is unhealthy on its own
    pub critical_latency: Duration,
    /// `used_memory / maxmemory` above this is an issue
    pub memory_usage: f64,
    /// Hit rate below this is an issue once traffic has been seen
    pub min_hit_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(100),
            critical_latency: Duration::from_secs(1),
            memory_usage: 0.9,
            min_hit_rate: 0.5,
        }
    }
}

/// Configuration for the cache client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Server host name or address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Database index selected after connecting
    pub database: Option<u8>,

    /// First segment of every key written by this client
    pub key_prefix: String,

    /// Second segment of every key written by this client
    pub namespace: String,

    /// TTL applied when a `set` carries none
    pub default_ttl: Option<Duration>,

    /// Serialized payloads larger than this are compressed when requested
    pub compression_threshold: usize,

    /// Pool configuration
    pub pool: PoolConfig,

    /// Reconnect attempts made when replacing a broken connection
    pub retry_attempts: u32,

    /// Base delay between reconnect attempts
    pub retry_delay: Duration,

    /// Reconnection settings
    pub reconnect: ReconnectConfig,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Per-command reply timeout
    pub operation_timeout: Duration,

    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,

    /// Health grading thresholds
    pub health: HealthThresholds,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            database: None,
            key_prefix: "cache".to_string(),
            namespace: "default".to_string(),
            default_ttl: None,
            compression_threshold: 1024,
            pool: PoolConfig::default(),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            tcp_keepalive: Some(Duration::from_secs(60)),
            health: HealthThresholds::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new configuration for the given server
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Parse `redis://[:password@]host[:port][/db]`
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for unsupported schemes or malformed parts.
    pub fn from_url(url: &str) -> CacheResult<Self> {
        let url = url.trim();
        if url.starts_with("rediss://") {
            return Err(CacheError::Config("TLS connections are not supported".to_string()));
        }
        let rest = url.strip_prefix("redis://").unwrap_or(url);

        let (authority, db) = match rest.split_once('/') {
            Some((authority, db)) if !db.is_empty() => (authority, Some(db)),
            Some((authority, _)) => (authority, None),
            None => (rest, None),
        };

        let (password, endpoint) = match authority.rsplit_once('@') {
            Some((userinfo, endpoint)) => {
                // user:password or :password
                let password = userinfo.split_once(':').map_or(userinfo, |(_, p)| p);
                (Some(password.to_string()).filter(|p| !p.is_empty()), endpoint)
            }
            None => (None, authority),
        };

        let (host, port) = match endpoint.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| CacheError::Config(format!("Invalid port in {url}")))?;
                (host, port)
            }
            None => (endpoint, 6379),
        };
        if host.is_empty() {
            return Err(CacheError::Config(format!("Missing host in {url}")));
        }

        let database = db
            .map(|db| {
                db.parse::<u8>()
                    .map_err(|_| CacheError::Config(format!("Invalid database in {url}")))
            })
            .transpose()?;

        Ok(Self {
            host: host.to_string(),
            port,
            password,
            database,
            ..Default::default()
        })
    }

    /// Set the password for authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database index
    #[must_use]
    pub const fn with_database(mut self, database: u8) -> Self {
        self.database = Some(database);
        self
    }

    /// Set the key prefix
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the default TTL
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set the compression threshold in bytes
    #[must_use]
    pub const fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Set the pool size
    #[must_use]
    pub const fn with_pool_size(mut self, size: usize) -> Self {
        self.pool.size = size;
        self
    }

    /// Set the pool configuration
    #[must_use]
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set reconnect attempts and their base delay
    #[must_use]
    pub const fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the health thresholds
    #[must_use]
    pub fn with_health_thresholds(mut self, health: HealthThresholds) -> Self {
        self.health = health;
        self
    }

    /// Check the configuration for values the client cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] describing the first problem found.
    pub fn validate(&self) -> CacheResult<()> {
        if self.host.is_empty() {
            return Err(CacheError::Config("host must not be empty".to_string()));
        }
        if self.pool.size == 0 {
            return Err(CacheError::Config("pool size must be at least 1".to_string()));
        }
        if self.key_prefix.is_empty() || self.namespace.is_empty() {
            return Err(CacheError::Config(
                "key prefix and namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` socket address string
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
