//! Hash commands

use super::{optional_bytes, Command};
use bytes::Bytes;
use cachewire_core::{
    error::{CacheError, CacheResult},
    value::RespValue,
};

/// HSET command - Set a field in a hash
#[derive(Debug, Clone)]
pub struct HSetCommand {
    key: String,
    field: String,
    value: Bytes,
}

impl HSetCommand {
    /// Create a new HSET command
    pub fn new(key: impl Into<String>, field: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

impl Command for HSetCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "HSET"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![
            RespValue::from(self.key.as_str()),
            RespValue::from(self.field.as_str()),
            RespValue::from(self.value.clone()),
        ]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// HGET command - Get the value of a hash field
#[derive(Debug, Clone)]
pub struct HGetCommand {
    key: String,
    field: String,
}

impl HGetCommand {
    /// Create a new HGET command
    pub fn new(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            field: field.into(),
        }
    }
}

impl Command for HGetCommand {
    type Output = Option<Bytes>;

    fn command_name(&self) -> &str {
        "HGET"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![
            RespValue::from(self.key.as_str()),
            RespValue::from(self.field.as_str()),
        ]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        optional_bytes(response)
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// HGETALL command - Get every field and value of a hash
#[derive(Debug, Clone)]
pub struct HGetAllCommand {
    key: String,
}

impl HGetAllCommand {
    /// Create a new HGETALL command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for HGetAllCommand {
    /// Field/value pairs in reply order
    type Output = Vec<(String, Bytes)>;

    fn command_name(&self) -> &str {
        "HGETALL"
    }

    fn args(&self) -> Vec<RespValue> {
        vec![RespValue::from(self.key.as_str())]
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        let items = response.into_array()?;
        if items.len() % 2 != 0 {
            return Err(CacheError::Protocol(
                "HGETALL reply has an odd number of elements".to_string(),
            ));
        }

        let mut pairs = Vec::with_capacity(items.len() / 2);
        for pair in items.chunks_exact(2) {
            pairs.push((pair[0].as_string()?, pair[1].as_bytes()?));
        }
        Ok(pairs)
    }

    fn keys(&self) -> Vec<&str> {
        vec![self.key.as_str()]
    }
}

/// HDEL command - Delete one or more hash fields
#[derive(Debug, Clone)]
pub struct HDelCommand {
    key: String,
    fields: Vec<String>,
}

impl HDelCommand {
    /// Create a new HDEL command
    pub fn new(key: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }
}

impl Command for HDelCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "HDEL"
    }

    fn args(&self) -> Vec<RespValue> {
        let mut args = vec![RespValue::from(self.key.as_str())];
        for field in &self.fields {
            args.push(RespValue::from(field.as_str()));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hset_args() {
        let cmd = HSetCommand::new("h", "f", "v");
        assert_eq!(
            cmd.args(),
            vec![
                RespValue::from("h"),
                RespValue::from("f"),
                RespValue::from("v")
            ]
        );
    }

    #[test]
    fn test_hgetall_pairs() {
        let cmd = HGetAllCommand::new("h");
        let response = RespValue::Array(vec![
            RespValue::from("f1"),
            RespValue::from("v1"),
            RespValue::from("f2"),
            RespValue::from("v2"),
        ]);
        let pairs = cmd.parse_response(response).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], ("f2".to_string(), Bytes::from_static(b"v2")));
    }

    #[test]
    fn test_hgetall_odd_reply() {
        let cmd = HGetAllCommand::new("h");
        let response = RespValue::Array(vec![RespValue::from("f1")]);
        assert!(matches!(
            cmd.parse_response(response),
            Err(CacheError::Protocol(_))
        ));
    }

    #[test]
    fn test_hget_missing_field() {
        let cmd = HGetCommand::new("h", "f");
        assert_eq!(cmd.parse_response(RespValue::Null).unwrap(), None);
    }
}
