//! High-level cache client
//!
//! [`CacheClient`] stores typed values under namespaced keys, indexes them by
//! tag, and keeps hit/miss/error counters. Every operation runs on a
//! connection borrowed from the pool for the duration of that operation.
//!
//! Keys on the wire look like `<prefix>:<namespace>:<key>`; tag sets live at
//! `<prefix>:<namespace>:tags:<tag>` and each tagged key records its own tags
//! at `<prefix>:<namespace>:keytags:<key>`.

use crate::commands::{
    Command, DelCommand, EvalCommand, ExistsCommand, ExpireCommand, GetCommand, HDelCommand,
    HGetAllCommand, HGetCommand, HSetCommand, LLenCommand, LRangeCommand, RPushCommand,
    SAddCommand, SMembersCommand, SRemCommand, ScanCommand, SetCommand, SetExCommand,
    TtlCommand,
};
use crate::compression;
use crate::connection::Connection;
use crate::events::{CacheEvent, EventBus};
use crate::health::{HealthMonitor, HealthProbe, HealthReport};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::options::{
    BatchOperation, BatchOutcome, DataProvider, GetOptions, InvalidateOptions, SetOptions,
    WarmOptions, WarmReport,
};
use crate::pipeline::Pipeline;
use crate::pool::{ConnectionPool, PoolStatus};
use crate::serializer::{JsonSerializer, ValueSerializer};
use crate::transaction::Transaction;
use bytes::Bytes;
use cachewire_core::{
    config::CacheConfig,
    error::{CacheError, CacheResult},
    types::{KeySpace, KeyTtl},
    value::RespValue,
};
use futures_util::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Keys examined per SCAN step
const SCAN_COUNT: u64 = 500;
/// Keys per DEL when removing many
const DEL_CHUNK: usize = 500;

type WireCommand = (String, Vec<RespValue>);

fn wire<C: Command>(command: C) -> WireCommand {
    (command.command_name().to_string(), command.args())
}

/// Run commands as one pipeline; the first failure fails the whole call
async fn run_all(conn: &Connection, commands: &[WireCommand]) -> CacheResult<Vec<RespValue>> {
    conn.execute_pipeline(commands).await?.into_iter().collect()
}

/// Every key matching `pattern`, via a full SCAN walk
async fn scan_keys(conn: &Connection, pattern: &str) -> CacheResult<Vec<String>> {
    let mut cursor = 0;
    // SCAN may return a key more than once
    let mut keys = BTreeSet::new();
    loop {
        let command = ScanCommand::new(cursor).pattern(pattern).count(SCAN_COUNT);
        let (next, batch) = conn.execute(&command).await?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    Ok(keys.into_iter().collect())
}

fn count(reply: i64) -> usize {
    usize::try_from(reply).unwrap_or(0)
}

/// Cache client over a pool of connections
///
/// `T` is the cached value type and `S` the strategy that serializes it.
///
/// # Example
///
/// ```no_run
/// use cachewire::{CacheClient, CacheConfig, SetOptions};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = CacheConfig::new("localhost", 6379).with_namespace("sessions");
///     let client: CacheClient<Vec<String>> = CacheClient::connect(config).await?;
///
///     let options = SetOptions::new()
///         .with_ttl(Duration::from_secs(300))
///         .with_tags(["user:42"]);
///     client.set_with("abc", &vec!["read".to_string()], options).await?;
///     assert!(client.get("abc").await?.is_some());
///     Ok(())
/// }
/// ```
pub struct CacheClient<T, S = JsonSerializer> {
    pool: ConnectionPool,
    keys: KeySpace,
    default_ttl: Option<Duration>,
    compression_threshold: usize,
    metrics: Arc<CacheMetrics>,
    events: EventBus,
    probe: Arc<HealthProbe>,
    serializer: S,
    _value: PhantomData<fn() -> T>,
}

impl<T> CacheClient<T, JsonSerializer>
where
    T: Serialize + DeserializeOwned,
{
    /// Connect with the JSON serializer
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or any pooled connection cannot
    /// be opened.
    pub async fn connect(config: CacheConfig) -> CacheResult<Self> {
        Self::connect_with_serializer(config, JsonSerializer).await
    }
}

impl<T, S> CacheClient<T, S>
where
    S: ValueSerializer<T>,
{
    /// Connect with a custom serializer
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or any pooled connection cannot
    /// be opened.
    pub async fn connect_with_serializer(config: CacheConfig, serializer: S) -> CacheResult<Self> {
        config.validate()?;
        info!(
            "Connecting cache client to {} ({}:{})",
            config.address(),
            config.key_prefix,
            config.namespace
        );

        let pool = ConnectionPool::initialize(&config.host, config.port, config.clone()).await?;
        let metrics = Arc::new(CacheMetrics::new());
        let probe = Arc::new(HealthProbe::new(
            pool.clone(),
            metrics.clone(),
            config.health.clone(),
        ));

        Ok(Self {
            pool,
            keys: KeySpace::new(config.key_prefix.as_str(), config.namespace.as_str()),
            default_ttl: config.default_ttl,
            compression_threshold: config.compression_threshold,
            metrics,
            events: EventBus::default(),
            probe,
            serializer,
            _value: PhantomData,
        })
    }

    /// Close every pooled connection
    ///
    /// Operations started afterwards fail with a pool error.
    pub async fn disconnect(&self) {
        self.pool.destroy().await;
        info!("Cache client disconnected");
    }

    fn space(&self, namespace: Option<&str>) -> Cow<'_, KeySpace> {
        match namespace {
            Some(ns) if ns != self.keys.namespace() => Cow::Owned(self.keys.with_namespace(ns)),
            _ => Cow::Borrowed(&self.keys),
        }
    }

    /// Count, publish and wrap a failure
    fn fail(&self, operation: &'static str, key: &str, error: CacheError) -> CacheError {
        self.metrics.record_error();
        debug!("Cache {} failed for key {}: {}", operation, key, error);
        self.events.emit(CacheEvent::Error {
            operation,
            key: key.to_string(),
            message: error.to_string(),
        });
        CacheError::operation(operation, key, error)
    }

    async fn run<C>(&self, operation: &'static str, key: &str, command: C) -> CacheResult<C::Output>
    where
        C: Command + Send + Sync,
    {
        let result = async {
            let conn = self.pool.acquire().await?;
            conn.execute(&command).await
        }
        .await;
        result.map_err(|e| self.fail(operation, key, e))
    }

    fn encode(&self, value: &T, compress: bool) -> CacheResult<Bytes> {
        let payload = self.serializer.serialize(value)?;
        if compress && payload.len() > self.compression_threshold {
            let wrapped = compression::compress(&payload)?;
            debug!(
                "Compressed payload from {} to {} bytes",
                payload.len(),
                wrapped.len()
            );
            return Ok(Bytes::from(wrapped));
        }
        Ok(Bytes::from(payload))
    }

    fn decode(&self, payload: &[u8]) -> CacheResult<T> {
        match compression::decompress(payload)? {
            Some(raw) => self.serializer.deserialize(&raw),
            None => self.serializer.deserialize(payload),
        }
    }

    /// Commands that store one entry and its tag index
    fn store_commands(
        &self,
        space: &KeySpace,
        key: &str,
        payload: Bytes,
        options: &SetOptions,
    ) -> Vec<WireCommand> {
        let wire_key = space.key(key);
        let ttl = options.ttl.or(self.default_ttl);

        let mut commands = vec![match ttl {
            Some(ttl) => wire(SetExCommand::new(wire_key.clone(), ttl, payload)),
            None => wire(SetCommand::new(wire_key.clone(), payload)),
        }];

        if !options.tags.is_empty() {
            for tag in &options.tags {
                commands.push(wire(SAddCommand::new(
                    space.tag_key(tag),
                    vec![wire_key.clone()],
                )));
            }
            let index = space.key_tags_key(key);
            commands.push(wire(SAddCommand::new(index.clone(), options.tags.clone())));
            if let Some(ttl) = ttl {
                commands.push(wire(ExpireCommand::new(index, ttl)));
            }
        }
        commands
    }

    /// Remove `key` from every tag set it was stored under
    async fn cleanup_key_tags(&self, conn: &Connection, space: &KeySpace, key: &str) -> CacheResult<()> {
        let index = space.key_tags_key(key);
        let tags = conn.execute(&SMembersCommand::new(index.clone())).await?;
        if tags.is_empty() {
            return Ok(());
        }

        let wire_key = space.key(key);
        let mut commands: Vec<WireCommand> = tags
            .iter()
            .map(|tag| wire(SRemCommand::new(space.tag_key(tag), vec![wire_key.clone()])))
            .collect();
        commands.push(wire(DelCommand::new(vec![index])));
        run_all(conn, &commands).await.map(|_| ())
    }

    /// Best-effort tag cleanup; failures are published, never returned
    async fn cleanup_tags(&self, conn: &Connection, space: &KeySpace, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.cleanup_key_tags(conn, space, key).await {
                warn!("Tag cleanup for key {} failed: {}", key, e);
                self.events.emit(CacheEvent::Error {
                    operation: "delete",
                    key: key.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Read a value
    ///
    /// Returns `None` on a miss.
    pub async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        self.get_with(key, GetOptions::default()).await
    }

    /// Read a value with options
    pub async fn get_with(&self, key: &str, options: GetOptions) -> CacheResult<Option<T>> {
        let started = Instant::now();
        let space = self.space(options.namespace.as_deref());

        let result = async {
            let conn = self.pool.acquire().await?;
            let payload = conn.execute(&GetCommand::new(space.key(key))).await?;
            payload.map(|bytes| self.decode(&bytes)).transpose()
        }
        .await;

        match result {
            Ok(Some(value)) => {
                self.metrics.record_hit(started.elapsed());
                self.events.emit(CacheEvent::Hit {
                    key: key.to_string(),
                });
                Ok(Some(value))
            }
            Ok(None) => {
                self.metrics.record_miss(started.elapsed());
                self.events.emit(CacheEvent::Miss {
                    key: key.to_string(),
                });
                Ok(None)
            }
            Err(e) => Err(self.fail("get", key, e)),
        }
    }

    /// Store a value with the default TTL
    pub async fn set(&self, key: &str, value: &T) -> CacheResult<()> {
        self.set_with(key, value, SetOptions::default()).await
    }

    /// Store a value with options
    ///
    /// The entry and its tag index are written in one pipeline.
    pub async fn set_with(&self, key: &str, value: &T, options: SetOptions) -> CacheResult<()> {
        let started = Instant::now();
        let ttl = options.ttl.or(self.default_ttl);

        let result = async {
            let payload = self.encode(value, options.compress)?;
            let space = self.space(options.namespace.as_deref());
            let commands = self.store_commands(&space, key, payload, &options);
            let conn = self.pool.acquire().await?;
            run_all(&conn, &commands).await
        }
        .await;

        match result {
            Ok(_) => {
                self.metrics.record_set(started.elapsed());
                self.events.emit(CacheEvent::Set {
                    key: key.to_string(),
                    ttl,
                });
                Ok(())
            }
            Err(e) => Err(self.fail("set", key, e)),
        }
    }

    /// Remove a key
    ///
    /// Returns whether the key existed. The key is also removed from the tag
    /// sets it was stored under; failures there are published as events.
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.delete_from(&self.keys, key).await
    }

    /// Remove a key stored in another namespace
    pub async fn delete_in(&self, namespace: &str, key: &str) -> CacheResult<bool> {
        let space = self.space(Some(namespace));
        self.delete_from(&space, key).await
    }

    async fn delete_from(&self, space: &KeySpace, key: &str) -> CacheResult<bool> {
        let result = async {
            let conn = self.pool.acquire().await?;
            let removed = conn.execute(&DelCommand::new(vec![space.key(key)])).await?;
            self.cleanup_tags(&conn, space, &[key.to_string()]).await;
            Ok::<_, CacheError>(removed > 0)
        }
        .await;

        match result {
            Ok(removed) => {
                if removed {
                    self.metrics.record_delete();
                    self.events.emit(CacheEvent::Delete {
                        key: key.to_string(),
                    });
                }
                Ok(removed)
            }
            Err(e) => Err(self.fail("delete", key, e)),
        }
    }

    /// Whether a key exists
    pub async fn has(&self, key: &str) -> CacheResult<bool> {
        let exists = self
            .run("has", key, ExistsCommand::new(vec![self.keys.key(key)]))
            .await?;
        Ok(exists > 0)
    }

    /// Whether a key exists in another namespace
    pub async fn has_in(&self, namespace: &str, key: &str) -> CacheResult<bool> {
        let wire_key = self.space(Some(namespace)).key(key);
        let exists = self
            .run("has", key, ExistsCommand::new(vec![wire_key]))
            .await?;
        Ok(exists > 0)
    }

    /// Remaining lifetime of a key
    pub async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        self.run("ttl", key, TtlCommand::new(self.keys.key(key)))
            .await
    }

    /// Remaining lifetime of a key in another namespace
    pub async fn ttl_in(&self, namespace: &str, key: &str) -> CacheResult<KeyTtl> {
        let wire_key = self.space(Some(namespace)).key(key);
        self.run("ttl", key, TtlCommand::new(wire_key)).await
    }

    /// Set a new expiry; returns `false` if the key does not exist
    pub async fn update_ttl(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.run("update_ttl", key, ExpireCommand::new(self.keys.key(key), ttl))
            .await
    }

    /// Run several operations in one pipeline
    ///
    /// Each operation gets its own result; a failing operation does not
    /// affect the others. The outer error is returned only when the batch
    /// as a whole could not be sent.
    pub async fn batch(
        &self,
        operations: Vec<BatchOperation<T>>,
    ) -> CacheResult<Vec<CacheResult<BatchOutcome<T>>>> {
        enum Planned {
            Failed(CacheError),
            Sent(usize),
        }

        let started = Instant::now();
        let mut commands = Vec::new();
        let mut plans = Vec::with_capacity(operations.len());

        for op in &operations {
            let sent = match op {
                BatchOperation::Get { key } => {
                    commands.push(wire(GetCommand::new(self.keys.key(key))));
                    1
                }
                BatchOperation::Set {
                    key,
                    value,
                    options,
                } => match self.encode(value, options.compress) {
                    Ok(payload) => {
                        let space = self.space(options.namespace.as_deref());
                        let store = self.store_commands(&space, key, payload, options);
                        let len = store.len();
                        commands.extend(store);
                        len
                    }
                    Err(e) => {
                        plans.push(Planned::Failed(e));
                        continue;
                    }
                },
                BatchOperation::Delete { key } => {
                    commands.push(wire(DelCommand::new(vec![self.keys.key(key)])));
                    1
                }
            };
            plans.push(Planned::Sent(sent));
        }

        let (conn, replies) = if commands.is_empty() {
            (None, Vec::new())
        } else {
            let conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| self.fail("batch", "", e))?;
            let replies = conn
                .execute_pipeline(&commands)
                .await
                .map_err(|e| self.fail("batch", "", e))?;
            (Some(conn), replies)
        };
        debug!(
            "Batch of {} operations sent as {} commands",
            operations.len(),
            commands.len()
        );

        let mut replies = replies.into_iter();
        let mut deleted = Vec::new();
        let mut results = Vec::with_capacity(operations.len());

        for (op, plan) in operations.iter().zip(plans) {
            let key = op.key();
            let outcome = match plan {
                Planned::Failed(e) => Err(e),
                Planned::Sent(len) => {
                    let mut own: Vec<CacheResult<RespValue>> = replies.by_ref().take(len).collect();
                    match op {
                        BatchOperation::Get { .. } => own
                            .pop()
                            .unwrap_or_else(|| Err(CacheError::Protocol("Missing reply".into())))
                            .and_then(|reply| {
                                if reply.is_null() {
                                    Ok(None)
                                } else {
                                    self.decode(&reply.as_bytes()?).map(Some)
                                }
                            })
                            .map(BatchOutcome::Value),
                        BatchOperation::Set { .. } => own
                            .into_iter()
                            .collect::<CacheResult<Vec<_>>>()
                            .map(|_| BatchOutcome::Stored),
                        BatchOperation::Delete { .. } => own
                            .pop()
                            .unwrap_or_else(|| Err(CacheError::Protocol("Missing reply".into())))
                            .and_then(|reply| reply.as_int())
                            .map(|n| BatchOutcome::Deleted(n > 0)),
                    }
                }
            };

            let outcome = match outcome {
                Ok(outcome) => {
                    self.record_batch_outcome(op, &outcome, started.elapsed());
                    if let BatchOutcome::Deleted(true) = outcome {
                        deleted.push(key.to_string());
                    }
                    Ok(outcome)
                }
                Err(e) => {
                    let operation = match op {
                        BatchOperation::Get { .. } => "get",
                        BatchOperation::Set { .. } => "set",
                        BatchOperation::Delete { .. } => "delete",
                    };
                    Err(self.fail(operation, key, e))
                }
            };
            results.push(outcome);
        }

        if let Some(conn) = conn {
            if !deleted.is_empty() {
                self.cleanup_tags(&conn, &self.keys, &deleted).await;
            }
        }
        Ok(results)
    }

    fn record_batch_outcome(&self, op: &BatchOperation<T>, outcome: &BatchOutcome<T>, elapsed: Duration) {
        let key = op.key().to_string();
        match (op, outcome) {
            (_, BatchOutcome::Value(Some(_))) => {
                self.metrics.record_hit(elapsed);
                self.events.emit(CacheEvent::Hit { key });
            }
            (_, BatchOutcome::Value(None)) => {
                self.metrics.record_miss(elapsed);
                self.events.emit(CacheEvent::Miss { key });
            }
            (BatchOperation::Set { options, .. }, BatchOutcome::Stored) => {
                self.metrics.record_set(elapsed);
                self.events.emit(CacheEvent::Set {
                    key,
                    ttl: options.ttl.or(self.default_ttl),
                });
            }
            (_, BatchOutcome::Deleted(true)) => {
                self.metrics.record_delete();
                self.events.emit(CacheEvent::Delete { key });
            }
            _ => {}
        }
    }

    /// Remove keys selected by explicit name, tag, glob pattern, or all
    ///
    /// Patterns are resolved with SCAN, never KEYS. Returns the number of
    /// entries removed; tag and index sets are not counted. Runs in the
    /// client's namespace unless `options.namespace` names another.
    pub async fn invalidate(&self, options: InvalidateOptions) -> CacheResult<usize> {
        let what = options.describe();
        let result = async {
            let conn = self.pool.acquire().await?;
            self.invalidate_on(&conn, &options).await
        }
        .await;

        match result {
            Ok(count) => {
                info!("Invalidated {} keys ({})", count, what);
                self.events.emit(CacheEvent::Invalidated { count });
                Ok(count)
            }
            Err(e) => Err(self.fail("invalidate", &what, e)),
        }
    }

    async fn invalidate_on(&self, conn: &Connection, options: &InvalidateOptions) -> CacheResult<usize> {
        let space = self.space(options.namespace.as_deref());
        let space: &KeySpace = &space;
        let mut entries = BTreeSet::new();
        let mut internal = BTreeSet::new();

        if options.all {
            for key in scan_keys(conn, &space.all_pattern()).await? {
                if space.is_internal(&key) {
                    internal.insert(key);
                } else {
                    entries.insert(key);
                }
            }
        } else {
            entries.extend(options.keys.iter().map(|k| space.key(k)));
            for tag in &options.tags {
                let tag_key = space.tag_key(tag);
                entries.extend(conn.execute(&SMembersCommand::new(tag_key.clone())).await?);
                internal.insert(tag_key);
            }
            if let Some(ref glob) = options.pattern {
                entries.extend(
                    scan_keys(conn, &space.pattern(glob))
                        .await?
                        .into_iter()
                        .filter(|k| !space.is_internal(k)),
                );
            }
        }

        let entries: Vec<String> = entries.into_iter().collect();
        let mut removed = 0;
        for chunk in entries.chunks(DEL_CHUNK) {
            removed += count(conn.execute(&DelCommand::new(chunk.to_vec())).await?);
        }

        if !options.all {
            let user_keys: Vec<String> = entries
                .iter()
                .filter_map(|k| space.user_key(k))
                .map(str::to_string)
                .collect();
            self.cleanup_tags(conn, space, &user_keys).await;
        }

        let internal: Vec<String> = internal.into_iter().collect();
        for chunk in internal.chunks(DEL_CHUNK) {
            conn.execute(&DelCommand::new(chunk.to_vec())).await?;
        }
        Ok(removed)
    }

    /// Remove everything in the namespace
    pub async fn clear(&self) -> CacheResult<usize> {
        self.invalidate(InvalidateOptions::all()).await
    }

    /// Number of entries in the namespace, excluding tag indexes
    pub async fn size(&self) -> CacheResult<usize> {
        let result = async {
            let conn = self.pool.acquire().await?;
            let keys = scan_keys(&conn, &self.keys.all_pattern()).await?;
            Ok::<_, CacheError>(keys.iter().filter(|k| !self.keys.is_internal(k)).count())
        }
        .await;
        result.map_err(|e| self.fail("size", "*", e))
    }

    /// Load values from `provider` and store them
    ///
    /// Keys are processed in chunks of `options.concurrency`, each chunk
    /// concurrently. A failing key is published as an error event and
    /// recorded in the report; the rest carry on.
    pub async fn warm<P>(&self, options: WarmOptions, provider: &P) -> WarmReport
    where
        P: DataProvider<T> + ?Sized,
    {
        let mut report = WarmReport::default();
        let chunk_size = options.concurrency.max(1);

        for chunk in options.keys.chunks(chunk_size) {
            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|key| self.warm_one(key, provider, &options.set_options)),
            )
            .await;

            for (key, warmed) in chunk.iter().zip(outcomes) {
                if warmed {
                    report.warmed += 1;
                } else {
                    report.failed_keys.push(key.clone());
                }
            }
        }

        info!(
            "Cache warm finished: {} stored, {} failed",
            report.warmed,
            report.failed()
        );
        report
    }

    async fn warm_one<P>(&self, key: &str, provider: &P, options: &SetOptions) -> bool
    where
        P: DataProvider<T> + ?Sized,
    {
        let value = match provider.fetch(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Warm provider failed for key {}: {}", key, e);
                self.metrics.record_error();
                self.events.emit(CacheEvent::Error {
                    operation: "warm",
                    key: key.to_string(),
                    message: e.to_string(),
                });
                return false;
            }
        };
        // set_with counts and publishes its own failures
        self.set_with(key, &value, options.clone()).await.is_ok()
    }

    /// Set a hash field; returns `true` if the field is new
    pub async fn hash_set(&self, key: &str, field: &str, value: &T) -> CacheResult<bool> {
        let payload = self
            .serializer
            .serialize(value)
            .map_err(|e| self.fail("hash_set", key, e))?;
        let added = self
            .run("hash_set", key, HSetCommand::new(self.keys.key(key), field, payload))
            .await?;
        Ok(added > 0)
    }

    /// Read a hash field
    pub async fn hash_get(&self, key: &str, field: &str) -> CacheResult<Option<T>> {
        let payload = self
            .run("hash_get", key, HGetCommand::new(self.keys.key(key), field))
            .await?;
        payload
            .map(|bytes| self.serializer.deserialize(&bytes))
            .transpose()
            .map_err(|e| self.fail("hash_get", key, e))
    }

    /// Read every field of a hash
    pub async fn hash_get_all(&self, key: &str) -> CacheResult<Vec<(String, T)>> {
        let pairs = self
            .run("hash_get_all", key, HGetAllCommand::new(self.keys.key(key)))
            .await?;
        pairs
            .into_iter()
            .map(|(field, bytes)| Ok((field, self.serializer.deserialize(&bytes)?)))
            .collect::<CacheResult<Vec<_>>>()
            .map_err(|e| self.fail("hash_get_all", key, e))
    }

    /// Delete hash fields; returns how many existed
    pub async fn hash_delete(&self, key: &str, fields: Vec<String>) -> CacheResult<usize> {
        let removed = self
            .run("hash_delete", key, HDelCommand::new(self.keys.key(key), fields))
            .await?;
        Ok(count(removed))
    }

    /// Append values to a list; returns the new length
    pub async fn list_push(&self, key: &str, values: &[T]) -> CacheResult<usize> {
        let payloads = values
            .iter()
            .map(|v| self.serializer.serialize(v).map(Bytes::from))
            .collect::<CacheResult<Vec<_>>>()
            .map_err(|e| self.fail("list_push", key, e))?;
        let len = self
            .run("list_push", key, RPushCommand::new(self.keys.key(key), payloads))
            .await?;
        Ok(count(len))
    }

    /// Read a range of a list; negative indices count from the end
    pub async fn list_range(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<T>> {
        let items = self
            .run("list_range", key, LRangeCommand::new(self.keys.key(key), start, stop))
            .await?;
        items
            .iter()
            .map(|bytes| self.serializer.deserialize(bytes))
            .collect::<CacheResult<Vec<_>>>()
            .map_err(|e| self.fail("list_range", key, e))
    }

    /// Length of a list
    pub async fn list_len(&self, key: &str) -> CacheResult<usize> {
        let len = self
            .run("list_len", key, LLenCommand::new(self.keys.key(key)))
            .await?;
        Ok(count(len))
    }

    /// Add members to a set; returns how many were new
    pub async fn set_add(&self, key: &str, members: Vec<String>) -> CacheResult<usize> {
        let added = self
            .run("set_add", key, SAddCommand::new(self.keys.key(key), members))
            .await?;
        Ok(count(added))
    }

    /// Members of a set
    pub async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.run("set_members", key, SMembersCommand::new(self.keys.key(key)))
            .await
    }

    /// Remove members from a set; returns how many existed
    pub async fn set_remove(&self, key: &str, members: Vec<String>) -> CacheResult<usize> {
        let removed = self
            .run("set_remove", key, SRemCommand::new(self.keys.key(key), members))
            .await?;
        Ok(count(removed))
    }

    /// Run a script with `EVAL`
    ///
    /// `keys` are user keys and are namespaced before sending. The reply is
    /// returned as-is.
    pub async fn eval(&self, script: &str, keys: &[&str], args: Vec<String>) -> CacheResult<RespValue> {
        let wire_keys = keys.iter().map(|k| self.keys.key(k)).collect();
        self.run("eval", &keys.join(","), EvalCommand::new(script, wire_keys, args))
            .await
    }

    /// A pipeline that runs on one pooled connection when executed
    ///
    /// Keys in a raw pipeline are wire keys; build them with
    /// [`key_space`](Self::key_space).
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(Arc::new(self.pool.clone()))
    }

    /// A transaction holding one pooled connection until dropped
    ///
    /// # Errors
    ///
    /// Fails if no connection can be acquired.
    pub async fn transaction(&self) -> CacheResult<Transaction> {
        let conn = self.pool.acquire().await?;
        let mut transaction = Transaction::new(Box::new(conn));
        // A previous holder of the connection may have left keys watched
        transaction.unwatch().await?;
        Ok(transaction)
    }

    /// Current counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run a health check now
    pub async fn get_health(&self) -> HealthReport {
        self.probe.check().await
    }

    /// Run health checks every `interval` in the background
    ///
    /// Unhealthy results are published as [`CacheEvent::HealthDegraded`].
    pub fn start_health_monitor(&self, interval: Duration) -> HealthMonitor {
        HealthMonitor::spawn(self.probe.clone(), self.events.clone(), interval)
    }

    /// Receive events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Pool occupancy
    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Key naming for this client's namespace
    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }
}

impl<T, S> std::fmt::Debug for CacheClient<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("keys", &self.keys)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_command() {
        let (name, args) = wire(GetCommand::new("app:ns:k"));
        assert_eq!(name, "GET");
        assert_eq!(args, vec![RespValue::from("app:ns:k")]);
    }

    #[test]
    fn test_count_clamps_negative() {
        assert_eq!(count(-1), 0);
        assert_eq!(count(3), 3);
    }
}
