//! SCAN command
//!
//! Cursor-based key enumeration. The cache client never issues `KEYS`.

use super::Command;
use cachewire_core::{
    error::{CacheError, CacheResult},
    value::RespValue,
};

/// SCAN command - one step of a cursor walk over the keyspace
#[derive(Debug, Clone)]
pub struct ScanCommand {
    cursor: u64,
    pattern: Option<String>,
    count: Option<u64>,
}

impl ScanCommand {
    /// Create a new SCAN command starting at `cursor` (0 begins a walk)
    pub fn new(cursor: u64) -> Self {
        Self {
            cursor,
            pattern: None,
            count: None,
        }
    }

    /// Only return keys matching a glob pattern (MATCH)
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Hint for how many keys to examine per step (COUNT)
    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }
}

impl Command for ScanCommand {
    /// Next cursor (0 when the walk is complete) and the keys of this step
    type Output = (u64, Vec<String>);

    fn command_name(&self) -> &str {
        "SCAN"
    }

    fn args(&self) -> Vec<RespValue> {
        let mut args = vec![RespValue::from(self.cursor)];
        if let Some(ref pattern) = self.pattern {
            args.push(RespValue::from("MATCH"));
            args.push(RespValue::from(pattern.as_str()));
        }
        if let Some(count) = self.count {
            args.push(RespValue::from("COUNT"));
            args.push(RespValue::from(count));
        }
        args
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        let mut items = response.into_array()?.into_iter();
        let (Some(cursor), Some(keys), None) = (items.next(), items.next(), items.next()) else {
            return Err(CacheError::Protocol(
                "SCAN reply must have exactly two elements".to_string(),
            ));
        };

        let cursor = u64::try_from(cursor.as_int()?)
            .map_err(|_| CacheError::Protocol("SCAN returned a negative cursor".to_string()))?;
        let keys = keys
            .into_array()?
            .iter()
            .map(RespValue::as_string)
            .collect::<CacheResult<Vec<_>>>()?;
        Ok((cursor, keys))
    }

    fn keys(&self) -> Vec<&str> {
        Vec::new()
    }
}
