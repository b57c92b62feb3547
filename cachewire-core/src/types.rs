//! Common types used throughout the library

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Builds wire keys of the form `<prefix>:<namespace>:<key>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
    namespace: String,
}

impl KeySpace {
    /// Create a key space for the given prefix and namespace
    pub fn new(prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            namespace: namespace.into(),
        }
    }

    /// The same prefix under a different namespace
    #[must_use]
    pub fn with_namespace(&self, namespace: &str) -> Self {
        Self::new(self.prefix.clone(), namespace)
    }

    /// Namespace segment
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Wire key for a user key
    #[must_use]
    pub fn key(&self, user_key: &str) -> String {
        format!("{}:{}:{}", self.prefix, self.namespace, user_key)
    }

    /// Wire key of the set holding every key stored under `tag`
    #[must_use]
    pub fn tag_key(&self, tag: &str) -> String {
        format!("{}:{}:tags:{}", self.prefix, self.namespace, tag)
    }

    /// Wire key of the set holding the tags `user_key` was stored under
    #[must_use]
    pub fn key_tags_key(&self, user_key: &str) -> String {
        format!("{}:{}:keytags:{}", self.prefix, self.namespace, user_key)
    }

    /// SCAN pattern matching every wire key in this namespace
    #[must_use]
    pub fn all_pattern(&self) -> String {
        format!("{}:{}:*", self.prefix, self.namespace)
    }

    /// SCAN pattern for a user glob
    #[must_use]
    pub fn pattern(&self, glob: &str) -> String {
        format!("{}:{}:{}", self.prefix, self.namespace, glob)
    }

    /// Whether a wire key is one of the client's internal index sets
    #[must_use]
    pub fn is_internal(&self, wire_key: &str) -> bool {
        let base = format!("{}:{}:", self.prefix, self.namespace);
        wire_key
            .strip_prefix(&base)
            .is_some_and(|rest| rest.starts_with("tags:") || rest.starts_with("keytags:"))
    }

    /// Recover the user key from a wire key in this namespace
    #[must_use]
    pub fn user_key<'a>(&self, wire_key: &'a str) -> Option<&'a str> {
        wire_key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(':')?
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix(':')
    }
}

/// Remaining lifetime of a key as reported by `TTL`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyTtl {
    /// The key does not exist (`-2`)
    Missing,
    /// The key exists without an expiry (`-1`)
    Persistent,
    /// The key expires after this long
    Expires(Duration),
}

impl KeyTtl {
    /// Interpret a `TTL` reply in seconds
    #[must_use]
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            -2 => Self::Missing,
            s if s < 0 => Self::Persistent,
            s => Self::Expires(Duration::from_secs(s as u64)),
        }
    }
}
