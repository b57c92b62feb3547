//! Async RESP cache client for Rust
//!
//! `cachewire` talks to Redis-compatible servers over plain TCP and layers a
//! typed cache on top: namespaced keys, tag-based invalidation, optional
//! payload compression, hit/miss metrics, health checks and an event stream.
//!
//! # Features
//!
//! - Bounded connection pool with FIFO waiters and background reconnect
//! - Pipelining with replies matched to requests in send order
//! - Typed command builders, pipelines and MULTI/EXEC transactions
//! - Tag, pattern and namespace invalidation (SCAN based)
//! - Health grading from latency, memory, hit rate and error counts
//!
//! # Quick Start
//!
//! ```no_run
//! use cachewire::{CacheClient, CacheConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::from_url("redis://localhost:6379/0")?;
//!     let client: CacheClient<String> = CacheClient::connect(config).await?;
//!
//!     client.set("greeting", &"hello".to_string()).await?;
//!     let value = client.get("greeting").await?;
//!     println!("Value: {:?}", value);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::large_enum_variant)]

pub mod client;
pub mod commands;
pub mod compression;
pub mod connection;
pub mod events;
pub mod health;
pub mod metrics;
pub mod options;
pub mod pipeline;
pub mod pool;
pub mod protocol;
pub mod serializer;
pub mod transaction;

pub use client::CacheClient;
pub use events::{CacheEvent, EventBus};
pub use health::{HealthMonitor, HealthReport, HealthStatus};
pub use metrics::MetricsSnapshot;
pub use options::{
    BatchOperation, BatchOutcome, DataProvider, GetOptions, InvalidateOptions, SetOptions,
    WarmOptions, WarmReport,
};
pub use pipeline::Pipeline;
pub use pool::{ConnectionPool, PoolStatus};
pub use serializer::{JsonSerializer, ValueSerializer};
pub use transaction::Transaction;

pub use cachewire_core::{
    config::{CacheConfig, HealthThresholds, PoolConfig, ReconnectConfig},
    error::{CacheError, CacheResult},
    types::{KeySpace, KeyTtl},
    value::RespValue,
};
