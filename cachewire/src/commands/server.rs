//! Server and scripting commands

use super::Command;
use cachewire_core::{error::CacheResult, value::RespValue};

/// PING command
#[derive(Debug, Clone, Default)]
pub struct PingCommand {
    message: Option<String>,
}

impl PingCommand {
    /// Create a new PING command
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo `message` instead of `PONG`
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

impl Command for PingCommand {
    type Output = String;

    fn command_name(&self) -> &str {
        "PING"
    }

    fn args(&self) -> Vec<RespValue> {
        self.message
            .iter()
            .map(|m| RespValue::from(m.as_str()))
            .collect()
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response.as_string()
    }

    fn keys(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// INFO command
#[derive(Debug, Clone, Default)]
pub struct InfoCommand {
    section: Option<String>,
}

impl InfoCommand {
    /// INFO for a single section (`memory`, `stats`, ...)
    pub fn section(section: impl Into<String>) -> Self {
        Self {
            section: Some(section.into()),
        }
    }
}

impl Command for InfoCommand {
    type Output = String;

    fn command_name(&self) -> &str {
        "INFO"
    }

    fn args(&self) -> Vec<RespValue> {
        self.section
            .iter()
            .map(|s| RespValue::from(s.as_str()))
            .collect()
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        response.as_string()
    }

    fn keys(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// Parse `field:value` lines of an INFO reply, skipping comments and blanks
pub fn parse_info(info: &str) -> impl Iterator<Item = (&str, &str)> {
    info.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
}

/// EVAL command
///
/// The script is passed through as-is; its reply is returned untouched.
#[derive(Debug, Clone)]
pub struct EvalCommand {
    script: String,
    keys: Vec<String>,
    args: Vec<String>,
}

impl EvalCommand {
    /// Create a new EVAL command
    pub fn new(script: impl Into<String>, keys: Vec<String>, args: Vec<String>) -> Self {
        Self {
            script: script.into(),
            keys,
            args,
        }
    }
}

impl Command for EvalCommand {
    type Output = RespValue;

    fn command_name(&self) -> &str {
        "EVAL"
    }

    fn args(&self) -> Vec<RespValue> {
        let mut args = Vec::with_capacity(2 + self.keys.len() + self.args.len());
        args.push(RespValue::from(self.script.as_str()));
        args.push(RespValue::from(self.keys.len() as u64));
        args.extend(self.keys.iter().map(|k| RespValue::from(k.as_str())));
        args.extend(self.args.iter().map(|a| RespValue::from(a.as_str())));
        args
    }

    fn parse_response(&self, response: RespValue) -> CacheResult<Self::Output> {
        Ok(response)
    }

    fn keys(&self) -> Vec<&str> {
        self.keys.iter().map(String::as_str).collect()
    }
}
