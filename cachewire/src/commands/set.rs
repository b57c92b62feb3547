//! Set commands
//!
//! Sets back the tag index: each tag set holds the wire keys stored under
//! that tag, and each key's reverse-index set holds its tags.

use super::Command;
use cachewire_core::{error::CacheResult, value::RespValue};

/// SADD command - Add one or more members to a set
#[derive(Debug, Clone)]
pub struct SAddCommand {
    key: String,
    members: Vec<String>,
}

impl SAddCommand {
    /// Create a new SADD command
    pub fn new(key: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            key: key.into(),
            members,
        }
    }
}

impl Command for SAddCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "SADD"
    }

    fn args(&self) -> Vec<RespValue> {
        let mut args = vec![RespValue::from(self.key.as_str())];
        for member in &self.members {
            args.push(RespValue::from(member.as_str()));
        }
        args
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// SREM command - Remove one or more members from a set
#[derive(Debug, Clone)]
pub struct SRemCommand {
    key: String,
    members: Vec<String>,
}

impl SRemCommand {
    /// Create a new SREM command
    pub fn new(key: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            key: key.into(),
            members,
        }
    }
}

impl Command for SRemCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "SREM"
    }

    fn args(&self) -> Vec<RespValue> {
        let mut args = vec![RespValue::from(self.key.as_str())];
        for member in &self.members {
            args.push(RespValue::from(member.as_str()));
        }
        args
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// SMEMBERS command - Get all members in a set
#[derive(Debug, Clone)]
pub struct SMembersCommand {
    key: String,
}

impl SMembersCommand {
    /// Create a new SMEMBERS command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for SMembersCommand {
    type Output = Vec<String>;

    fn command_name(&self) -> &str {
        "SMEMBERS"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![RespValue::from(self.key.as_str())]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response
            .into_array()?
            .iter()
            .map(RespValue::as_string)
            .collect()
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// SCARD command - Get the number of members in a set
#[derive(Debug, Clone)]
pub struct SCardCommand {
    key: String,
}

impl SCardCommand {
    /// Create a new SCARD command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for SCardCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "SCARD"
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
