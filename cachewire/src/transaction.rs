//! Transaction support using MULTI/EXEC/WATCH
//!
//! A transaction keeps one pooled connection for its whole lifetime, since
//! WATCH state lives on the server side of a single connection. Queued
//! commands are sent together with `MULTI` and `EXEC` as one pipeline.
//!
//! # Examples
//!
//! ```no_run
//! use cachewire::{CacheClient, CacheConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client: CacheClient<String> = CacheClient::connect(CacheConfig::default()).await?;
//!
//! let mut transaction = client.transaction().await?;
//! transaction.watch(vec!["cache:default:balance".to_string()]).await?;
//! transaction.set("cache:default:balance", "100");
//! transaction.get("cache:default:balance");
//!
//! match transaction.exec().await? {
//!     Some(results) => println!("committed: {:?}", results),
//!     None => println!("a watched key changed, nothing was applied"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::commands::{DelCommand, ExpireCommand, GetCommand, HSetCommand, SAddCommand, SetCommand};
use crate::pipeline::{PipelineCommand, PipelineExecutor, RawCommand};
use bytes::Bytes;
use cachewire_core::{
    error::{CacheError, CacheResult},
    value::RespValue,
};
use std::time::Duration;
use tracing::debug;

/// A transaction that executes its commands atomically
pub struct Transaction {
    commands: Vec<Box<dyn PipelineCommand>>,
    executor: Box<dyn PipelineExecutor>,
    watched_keys: Vec<String>,
}

impl Transaction {
    /// Create a new transaction on a dedicated executor
    pub fn new(executor: Box<dyn PipelineExecutor>) -> Self {
        Self {
            commands: Vec::new(),
            executor,
            watched_keys: Vec::new(),
        }
    }

    async fn run_single(&self, command: RawCommand) -> CacheResult<RespValue> {
        self.executor
            .execute_pipeline(vec![Box::new(command)])
            .await?
            .pop()
            .unwrap_or_else(|| Err(CacheError::Protocol("Missing reply".to_string())))
    }

    /// Watch keys for changes
    ///
    /// If any watched key is modified before `exec`, the transaction is
    /// aborted and `exec` returns `None`.
    pub async fn watch(&mut self, keys: Vec<String>) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let args = keys.iter().map(|k| RespValue::from(k.as_str())).collect();
        self.run_single(RawCommand::new("WATCH", args)).await?;
        self.watched_keys.extend(keys);
        Ok(())
    }

    /// Unwatch all previously watched keys
    pub async fn unwatch(&mut self) -> CacheResult<()> {
        self.run_single(RawCommand::new("UNWATCH", Vec::new()))
            .await?;
        self.watched_keys.clear();
        Ok(())
    }

    /// Keys currently watched
    #[must_use]
    pub fn watched_keys(&self) -> &[String] {
        &self.watched_keys
    }

    /// Add a command to the transaction
    pub fn add_command(&mut self, command: Box<dyn PipelineCommand>) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Queue an arbitrary command
    pub fn cmd(&mut self, name: impl Into<String>, args: Vec<RespValue>) -> &mut Self {
        self.add_command(Box::new(RawCommand::new(name, args)))
    }

    /// Queue a SET command
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Bytes>) -> &mut Self {
        self.add_command(Box::new(SetCommand::new(key, value)))
    }

    /// Queue a GET command
    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.add_command(Box::new(GetCommand::new(key)))
    }

    /// Queue a DEL command
    pub fn del(&mut self, keys: Vec<String>) -> &mut Self {
        self.add_command(Box::new(DelCommand::new(keys)))
    }

    /// Queue an EXPIRE command
    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.add_command(Box::new(ExpireCommand::new(key, ttl)))
    }

    /// Queue an SADD command
    pub fn sadd(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.add_command(Box::new(SAddCommand::new(key, members)))
    }

    /// Queue an HSET command
    pub fn hset(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Bytes>,
    ) -> &mut Self {
        self.add_command(Box::new(HSetCommand::new(key, field, value)))
    }

    /// Get the number of queued commands
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if no commands are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Execute the transaction
    ///
    /// Sends `MULTI`, the queued commands and `EXEC` in one pipeline. Returns
    /// `Some` with one result per command, or `None` when a watched key
    /// changed and the server aborted the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is empty, the batch could not be
    /// sent, or the server refused to queue a command (`EXECABORT`).
    pub async fn exec(&mut self) -> CacheResult<Option<Vec<CacheResult<RespValue>>>> {
        if self.commands.is_empty() {
            return Err(CacheError::Protocol("Transaction is empty".to_string()));
        }

        let queued = self.commands.len();
        let mut batch: Vec<Box<dyn PipelineCommand>> = Vec::with_capacity(queued + 2);
        batch.push(Box::new(RawCommand::new("MULTI", Vec::new())));
        batch.append(&mut self.commands);
        batch.push(Box::new(RawCommand::new("EXEC", Vec::new())));

        debug!("Executing transaction of {} commands", queued);
        let mut replies = self.executor.execute_pipeline(batch).await?;
        // EXEC discards every WATCH on the connection, whatever the outcome
        self.watched_keys.clear();

        let exec_reply = replies
            .pop()
            .ok_or_else(|| CacheError::Protocol("Missing EXEC reply".to_string()))?;
        let mut replies = replies.into_iter();
        match replies.next() {
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
            None => return Err(CacheError::Protocol("Missing MULTI reply".to_string())),
        }
        // A refused command surfaces as the queueing error, which explains
        // the EXECABORT that follows.
        if let Some(Err(e)) = replies.find(Result::is_err) {
            return Err(e);
        }

        match exec_reply? {
            RespValue::Null => {
                debug!("Transaction aborted by a watched key");
                Ok(None)
            }
            RespValue::Array(items) => Ok(Some(
                items
                    .into_iter()
                    .map(|item| match item {
                        RespValue::Error(msg) => Err(CacheError::Server(msg)),
                        other => Ok(other),
                    })
                    .collect(),
            )),
            other => Err(CacheError::Protocol(format!(
                "Unexpected EXEC response: {:?}",
                other
            ))),
        }
    }

    /// Drop the queued commands and release any watched keys
    ///
    /// Nothing reaches the server before `exec`, so there is no `MULTI` to
    /// discard; only the WATCH state needs clearing.
    pub async fn discard(&mut self) -> CacheResult<()> {
        self.commands.clear();
        if !self.watched_keys.is_empty() {
            self.unwatch().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("commands", &self.commands.len())
            .field("watched_keys", &self.watched_keys)
            .finish()
    }
}
