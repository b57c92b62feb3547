//! List commands

use super::Command;
use bytes::Bytes;
use cachewire_core::{error::CacheResult, value::RespValue};

fn push_args(key: &str, values: &[Bytes]) -> Vec<RespValue> {
    let mut args = Vec::with_capacity(values.len() + 1);
    args.push(RespValue::from(key));
    args.extend(values.iter().cloned().map(RespValue::from));
    args
}

/// RPUSH command - Append values to a list
#[derive(Debug, Clone)]
pub struct RPushCommand {
    key: String,
    values: Vec<Bytes>,
}

impl RPushCommand {
    /// Create a new RPUSH command
    pub fn new(key: impl Into<String>, values: Vec<Bytes>) -> Self {
        Self {
            key: key.into(),
            values,
        }
    }
}

impl Command for RPushCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "RPUSH"
    }

    fn args(&self) -> Vec<RespValue> {
        push_args(&self.key, &self.values)
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// LRANGE command - Get a range of elements
#[derive(Debug, Clone)]
pub struct LRangeCommand {
    key: String,
    start: i64,
    stop: i64,
}

impl LRangeCommand {
    /// Create a new LRANGE command; negative indices count from the end
    pub fn new(key: impl Into<String>, start: i64, stop: i64) -> Self {
        Self {
            key: key.into(),
            start,
            stop,
        }
    }
}

impl Command for LRangeCommand {
    type Output = Vec<Bytes>;

    fn command_name(&self) -> &str {
        "LRANGE"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![
            RespValue::from(self.key.as_str()),
            RespValue::from(self.start),
            RespValue::from(self.stop),
        ]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response
            .into_array()?
            .iter()
            .map(RespValue::as_bytes)
            .collect()
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// LLEN command - Get the length of a list
#[derive(Debug, Clone)]
pub struct LLenCommand {
    key: String,
}

impl LLenCommand {
    /// Create a new LLEN command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for LLenCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "LLEN"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![RespValue::from(self.key.as_str())]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}
