//! Core types for the cachewire cache client
//!
//! This crate provides the reply model, error definitions, configuration
//! and key-naming helpers shared by the `cachewire` client.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{CacheConfig, HealthThresholds, PoolConfig, ReconnectConfig};
pub use error::{CacheError, CacheResult};
pub use types::{KeySpace, KeyTtl};
pub use value::RespValue;
