//! Per-call options and batch/warm types for [`CacheClient`](crate::CacheClient)

use cachewire_core::error::CacheResult;
use std::future::Future;
use std::time::Duration;

/// Options for `get_with`
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Read from this namespace instead of the client's
    pub namespace: Option<String>,
}

impl GetOptions {
    /// Read from another namespace
    #[must_use]
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }
}

/// Options for `set_with`
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Expiry; falls back to the configured default TTL
    pub ttl: Option<Duration>,
    /// Tags to index the key under
    pub tags: Vec<String>,
    /// Compress the payload when it exceeds the compression threshold
    pub compress: bool,
    /// Write into this namespace instead of the client's
    pub namespace: Option<String>,
}

impl SetOptions {
    /// Empty options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expiry
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Add tags
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Compress large payloads
    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    /// Write into another namespace
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// What `invalidate` should remove
///
/// Every selector that is set contributes keys; the union is removed.
#[derive(Debug, Clone, Default)]
pub struct InvalidateOptions {
    /// Explicit user keys
    pub keys: Vec<String>,
    /// Every key stored under any of these tags
    pub tags: Vec<String>,
    /// Glob over user keys, resolved with SCAN
    pub pattern: Option<String>,
    /// Everything in the namespace, including tag indexes
    pub all: bool,
    /// Work in this namespace instead of the client's
    pub namespace: Option<String>,
}

impl InvalidateOptions {
    /// Invalidate explicit keys
    #[must_use]
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Invalidate by tag
    #[must_use]
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Invalidate by glob pattern
    #[must_use]
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    /// Invalidate the whole namespace
    #[must_use]
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    /// Work in another namespace
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Short description used in errors and logs
    pub(crate) fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref namespace) = self.namespace {
            parts.push(format!("namespace={}", namespace));
        }
        if self.all {
            parts.push("*".to_string());
            return parts.join(" ");
        }
        if !self.keys.is_empty() {
            parts.push(format!("keys={}", self.keys.join(",")));
        }
        if !self.tags.is_empty() {
            parts.push(format!("tags={}", self.tags.join(",")));
        }
        if let Some(ref pattern) = self.pattern {
            parts.push(format!("pattern={}", pattern));
        }
        parts.join(" ")
    }
}

/// One operation of a batch
#[derive(Debug, Clone)]
pub enum BatchOperation<T> {
    /// Read a key
    Get {
        /// User key
        key: String,
    },
    /// Write a key
    Set {
        /// User key
        key: String,
        /// Value to store
        value: T,
        /// Write options
        options: SetOptions,
    },
    /// Remove a key
    Delete {
        /// User key
        key: String,
    },
}

impl<T> BatchOperation<T> {
    /// Read `key`
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    /// Write `value` under `key` with default options
    pub fn set(key: impl Into<String>, value: T) -> Self {
        Self::Set {
            key: key.into(),
            value,
            options: SetOptions::default(),
        }
    }

    /// Remove `key`
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// User key the operation targets
    pub fn key(&self) -> &str {
        match self {
            Self::Get { key } | Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Successful result of one batch operation
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome<T> {
    /// Result of a `Get`
    Value(Option<T>),
    /// A `Set` was stored
    Stored,
    /// Result of a `Delete`: whether the key existed
    Deleted(bool),
}

/// Source of values for `warm`
#[async_trait::async_trait]
pub trait DataProvider<T>: Send + Sync {
    /// Produce the value to cache under `key`
    async fn fetch(&self, key: &str) -> CacheResult<T>;
}

#[async_trait::async_trait]
impl<T, F, Fut> DataProvider<T> for F
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = CacheResult<T>> + Send + 'static,
{
    async fn fetch(&self, key: &str) -> CacheResult<T> {
        (self)(key.to_string()).await
    }
}

/// Options for `warm`
#[derive(Debug, Clone)]
pub struct WarmOptions {
    /// User keys to load
    pub keys: Vec<String>,
    /// Keys fetched and written at the same time
    pub concurrency: usize,
    /// Options used for every write
    pub set_options: SetOptions,
}

impl WarmOptions {
    /// Warm `keys`, ten at a time
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            concurrency: 10,
            set_options: SetOptions::default(),
        }
    }

    /// Set the chunk size
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the write options
    #[must_use]
    pub fn with_set_options(mut self, options: SetOptions) -> Self {
        self.set_options = options;
        self
    }
}

/// Outcome of a `warm` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Keys fetched and written
    pub warmed: usize,
    /// Keys whose fetch or write failed
    pub failed_keys: Vec<String>,
}

impl WarmReport {
    /// Number of failed keys
    pub fn failed(&self) -> usize {
        self.failed_keys.len()
    }
}
