//! Pipeline support for batching commands
//!
//! A pipeline writes every queued command in a single write and then reads
//! the replies back in submission order. Each command gets its own result:
//! one failing command does not fail the others.
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
//! let mut pipeline = client.pipeline();
//! pipeline.set("cache:default:a", "1");
//! pipeline.get("cache:default:a");
//! pipeline.del(vec!["cache:default:b".to_string()]);
//!
//! for result in pipeline.execute().await? {
//!     println!("{:?}", result);
//! }
//! # Ok(())
//! # }
//! ```

use crate::commands::{
    Command, DelCommand, ExistsCommand, ExpireCommand, GetCommand, HGetCommand, HSetCommand,
    RPushCommand, SAddCommand, SRemCommand, SetCommand, SetExCommand, TtlCommand,
};
use crate::connection::Connection;
use crate::pool::{ConnectionPool, PooledConnection};
use bytes::Bytes;
use cachewire_core::{
    error::{CacheError, CacheResult},
    value::RespValue,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Trait for commands that can be used in pipelines
pub trait PipelineCommand: Send + Sync {
    /// Get the command name
    fn name(&self) -> &str;

    /// Get the command arguments
    fn args(&self) -> Vec<RespValue>;

    /// Get the first key involved in this command
    fn key(&self) -> Option<String>;
}

impl<C> PipelineCommand for C
where
    C: Command + Send + Sync,
{
    fn name(&self) -> &str {
        self.command_name()
    }

    fn args(&self) -> Vec<RespValue> {
        Command::args(self)
    }

    fn key(&self) -> Option<String> {
        self.keys().first().map(|k| (*k).to_string())
    }
}

/// A command given by verb and arguments, for anything without a builder
#[derive(Debug, Clone)]
pub struct RawCommand {
    name: String,
    args: Vec<RespValue>,
}

impl RawCommand {
    /// Create a raw command
    pub fn new(name: impl Into<String>, args: Vec<RespValue>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl PipelineCommand for RawCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn args(&self) -> Vec<RespValue> {
        self.args.clone()
    }

    fn key(&self) -> Option<String> {
        None
    }
}

/// Trait for executing pipelined commands
#[async_trait::async_trait]
pub trait PipelineExecutor: Send + Sync {
    /// Execute a batch of commands and return one result per command
    async fn execute_pipeline(
        &self,
        commands: Vec<Box<dyn PipelineCommand>>,
    ) -> CacheResult<Vec<CacheResult<RespValue>>>;
}

fn to_wire(commands: &[Box<dyn PipelineCommand>]) -> Vec<(String, Vec<RespValue>)> {
    commands
        .iter()
        .map(|cmd| (cmd.name().to_string(), cmd.args()))
        .collect()
}

#[async_trait::async_trait]
impl PipelineExecutor for PooledConnection {
    async fn execute_pipeline(
        &self,
        commands: Vec<Box<dyn PipelineCommand>>,
    ) -> CacheResult<Vec<CacheResult<RespValue>>> {
        let wire = to_wire(&commands);
        Connection::execute_pipeline(self, &wire).await
    }
}

#[async_trait::async_trait]
impl PipelineExecutor for ConnectionPool {
    async fn execute_pipeline(
        &self,
        commands: Vec<Box<dyn PipelineCommand>>,
    ) -> CacheResult<Vec<CacheResult<RespValue>>> {
        let wire = to_wire(&commands);
        let conn = self.acquire().await?;
        Connection::execute_pipeline(&conn, &wire).await
    }
}

/// A pipeline for batching commands
pub struct Pipeline {
    commands: Vec<Box<dyn PipelineCommand>>,
    executor: Arc<dyn PipelineExecutor>,
}

impl Pipeline {
    /// Create a new pipeline
    pub fn new(executor: Arc<dyn PipelineExecutor>) -> Self {
        Self {
            commands: Vec::new(),
            executor,
        }
    }

    /// Add a command to the pipeline
    pub fn add_command(&mut self, command: Box<dyn PipelineCommand>) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Add an arbitrary command to the pipeline
    pub fn cmd(&mut self, name: impl Into<String>, args: Vec<RespValue>) -> &mut Self {
        self.add_command(Box::new(RawCommand::new(name, args)))
    }

    /// Add a SET command to the pipeline
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Bytes>) -> &mut Self {
        self.add_command(Box::new(SetCommand::new(key, value)))
    }

    /// Add a SETEX command to the pipeline
    pub fn set_ex(
        &mut self,
        key: impl Into<String>,
        ttl: Duration,
        value: impl Into<Bytes>,
    ) -> &mut Self {
        self.add_command(Box::new(SetExCommand::new(key, ttl, value)))
    }

    /// Add a GET command to the pipeline
    pub fn get(&mut self, key: impl Into<String>) -> &mut Self {
        self.add_command(Box::new(GetCommand::new(key)))
    }

    /// Add a DEL command to the pipeline
    pub fn del(&mut self, keys: Vec<String>) -> &mut Self {
        self.add_command(Box::new(DelCommand::new(keys)))
    }

    /// Add an EXISTS command to the pipeline
    pub fn exists(&mut self, keys: Vec<String>) -> &mut Self {
        self.add_command(Box::new(ExistsCommand::new(keys)))
    }

    /// Add an EXPIRE command to the pipeline
    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.add_command(Box::new(ExpireCommand::new(key, ttl)))
    }

    /// Add a TTL command to the pipeline
    pub fn ttl(&mut self, key: impl Into<String>) -> &mut Self {
        self.add_command(Box::new(TtlCommand::new(key)))
    }

    /// Add an SADD command to the pipeline
    pub fn sadd(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.add_command(Box::new(SAddCommand::new(key, members)))
    }

    /// Add an SREM command to the pipeline
    pub fn srem(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.add_command(Box::new(SRemCommand::new(key, members)))
    }

    /// Add an HSET command to the pipeline
    pub fn hset(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Bytes>,
    ) -> &mut Self {
        self.add_command(Box::new(HSetCommand::new(key, field, value)))
    }

    /// Add an HGET command to the pipeline
    pub fn hget(&mut self, key: impl Into<String>, field: impl Into<String>) -> &mut Self {
        self.add_command(Box::new(HGetCommand::new(key, field)))
    }

    /// Add an RPUSH command to the pipeline
    pub fn rpush(&mut self, key: impl Into<String>, values: Vec<Bytes>) -> &mut Self {
        self.add_command(Box::new(RPushCommand::new(key, values)))
    }

    /// Get the number of commands in the pipeline
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if the pipeline is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Clear all commands from the pipeline
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Execute all commands in the pipeline
    ///
    /// Returns the results in the order the commands were added. The queue
    /// is drained either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty or the batch as a whole
    /// could not be sent. Per-command failures are reported in the vector.
    pub async fn execute(&mut self) -> CacheResult<Vec<CacheResult<RespValue>>> {
        if self.commands.is_empty() {
            return Err(CacheError::Protocol("Pipeline is empty".to_string()));
        }

        let commands: Vec<Box<dyn PipelineCommand>> = self.commands.drain(..).collect();
        debug!("Executing pipeline of {} commands", commands.len());
        self.executor.execute_pipeline(commands).await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("commands", &self.commands.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockExecutor {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl PipelineExecutor for MockExecutor {
        async fn execute_pipeline(
            &self,
            commands: Vec<Box<dyn PipelineCommand>>,
        ) -> CacheResult<Vec<CacheResult<RespValue>>> {
            let mut seen = self.seen.lock().unwrap();
            Ok(commands
                .iter()
                .map(|cmd| {
                    seen.push(cmd.name().to_string());
                    if cmd.name() == "SADD" {
                        Err(CacheError::Server("WRONGTYPE".to_string()))
                    } else {
                        Ok(RespValue::SimpleString("OK".to_string()))
                    }
                })
                .collect())
        }
    }

    fn mock() -> Arc<MockExecutor> {
        Arc::new(MockExecutor {
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_pipeline_add_commands() {
        let mut pipeline = Pipeline::new(mock());
        assert!(pipeline.is_empty());

        pipeline.set("key1", "value1").get("key1");
        assert_eq!(pipeline.len(), 2);

        pipeline.clear();
        assert!(pipeline.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_execute_in_order() {
        let executor = mock();
        let mut pipeline = Pipeline::new(executor.clone());
        pipeline
            .set("key1", "value1")
            .sadd("tags", vec!["key1".to_string()])
            .get("key1");

        let results = pipeline.execute().await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert!(pipeline.is_empty());
        assert_eq!(*executor.seen.lock().unwrap(), vec!["SET", "SADD", "GET"]);
    }

    #[tokio::test]
    async fn test_empty_pipeline_errors() {
        let mut pipeline = Pipeline::new(mock());
        assert!(pipeline.execute().await.is_err());
    }

    #[test]
    fn test_pipeline_command_key() {
        let cmd = GetCommand::new("k");
        assert_eq!(PipelineCommand::key(&cmd), Some("k".to_string()));
        assert_eq!(RawCommand::new("PING", vec![]).key(), None);
    }
}
