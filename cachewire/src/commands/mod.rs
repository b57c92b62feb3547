//! Command builders
//!
//! Each command is a small struct that knows its verb, its arguments and how
//! to turn the server's reply into a typed value. Builders are executed with
//! [`Connection::execute`](crate::connection::Connection::execute) or queued
//! on a [`Pipeline`](crate::pipeline::Pipeline).
//!
//! ```no_run
//! use cachewire::commands::{Command, GetCommand, SetExCommand};
//! use std::time::Duration;
//!
//! let set = SetExCommand::new("cache:default:user:1", Duration::from_secs(60), "{}");
//! assert_eq!(set.command_name(), "SETEX");
//! let get = GetCommand::new("cache:default:user:1");
//! assert_eq!(get.keys(), vec!["cache:default:user:1"]);
//! ```

pub mod hash;
pub mod list;
pub mod scan;
pub mod server;
pub mod set;

use bytes::Bytes;
use cachewire_core::{error::CacheResult, types::KeyTtl, value::RespValue, CacheError};
use std::time::Duration;

pub use hash::{HDelCommand, HGetAllCommand, HGetCommand, HSetCommand};
pub use list::{LLenCommand, LRangeCommand, RPushCommand};
pub use scan::ScanCommand;
pub use server::{EvalCommand, InfoCommand, PingCommand};
pub use set::{SAddCommand, SCardCommand, SMembersCommand, SRemCommand};

/// Trait for commands that can be executed
pub trait Command {
    /// The return type of the command
    type Output;

    /// Get the command name
    fn command_name(&self) -> &str;

    /// Get the command arguments
    fn args(&self) -> Vec<RespValue>;

    /// Parse the response into the output type
    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output>;

    /// Get the key(s) involved in this command
    fn keys(&self) -> Vec<&str>;
}

/// Whole seconds for an expiry, rounded up and never zero
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    let millis = ttl.as_millis();
    u64::try_from(millis.div_ceil(1000)).unwrap_or(u64::MAX).max(1)
}

fn expect_ok(command: &str, response: &RespValue) -> CacheResult<()> {
    match response {
        RespValue::SimpleString(s) if s == "OK" => Ok(()),
        other => Err(CacheError::Protocol(format!(
            "Unexpected {} response: {:?}",
            command, other
        ))),
    }
}

fn optional_bytes(response: RespValue) -> CacheResult<Option<Bytes>> {
    if response.is_null() {
        Ok(None)
    } else {
        response.as_bytes().map(Some)
    }
}

/// GET command builder
#[derive(Debug, Clone)]
pub struct GetCommand {
    key: String,
}

impl GetCommand {
    /// Create a new GET command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for GetCommand {
    type Output = Option<Bytes>;

    fn command_name(&self) -> &str {
        "GET"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![RespValue::from(self.key.as_str())]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        optional_bytes(response)
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// SET command builder
#[derive(Debug, Clone)]
pub struct SetCommand {
    key: String,
    value: Bytes,
}

impl SetCommand {
    /// Create a new SET command
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Command for SetCommand {
    type Output = ();

    fn command_name(&self) -> &str {
        "SET"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![
            RespValue::from(self.key.as_str()),
            RespValue::from(self.value.clone()),
        ]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        expect_ok("SET", &response)
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// SETEX command builder
#[derive(Debug, Clone)]
pub struct SetExCommand {
    key: String,
    ttl: Duration,
    value: Bytes,
}

impl SetExCommand {
    /// Create a new SETEX command; the TTL is rounded up to whole seconds
    pub fn new(key: impl Into<String>, ttl: Duration, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            ttl,
            value: value.into(),
        }
    }
}

impl Command for SetExCommand {
    type Output = ();

    fn command_name(&self) -> &str {
        "SETEX"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![
            RespValue::from(self.key.as_str()),
            RespValue::from(ttl_seconds(self.ttl)),
            RespValue::from(self.value.clone()),
        ]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        expect_ok("SETEX", &response)
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// DEL command builder
#[derive(Debug, Clone)]
pub struct DelCommand {
    keys: Vec<String>,
}

impl DelCommand {
    /// Create a new DEL command
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl Command for DelCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "DEL"
    }

    fn args(&self) -> Vec<RespValue> {
        self.keys
            .iter()
            .map(|k| RespValue::from(k.as_str()))
            .collect()
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&str> {
        self.keys.iter().map(String::as_str).collect()
    }
}

/// EXISTS command builder
#[derive(Debug, Clone)]
pub struct ExistsCommand {
    keys: Vec<String>,
}

impl ExistsCommand {
    /// Create a new EXISTS command
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl Command for ExistsCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "EXISTS"
    }

    fn args(&self) -> Vec<RespValue> {
        self.keys
            .iter()
            .map(|k| RespValue::from(k.as_str()))
            .collect()
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&str> {
        self.keys.iter().map(String::as_str).collect()
    }
}

/// EXPIRE command builder
#[derive(Debug, Clone)]
pub struct ExpireCommand {
    key: String,
    ttl: Duration,
}

impl ExpireCommand {
    /// Create a new EXPIRE command; the TTL is rounded up to whole seconds
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
        }
    }
}

impl Command for ExpireCommand {
    type Output = bool;

    fn command_name(&self) -> &str {
        "EXPIRE"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![
            RespValue::from(self.key.as_str()),
            RespValue::from(ttl_seconds(self.ttl)),
        ]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        Ok(response.as_int()? == 1)
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// TTL command builder
#[derive(Debug, Clone)]
pub struct TtlCommand {
    key: String,
}

impl TtlCommand {
    /// Create a new TTL command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for TtlCommand {
    type Output = KeyTtl;

    fn command_name(&self) -> &str {
        "TTL"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![RespValue::from(self.key.as_str())]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        Ok(KeyTtl::from_seconds(response.as_int()?))
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}
