//! RESP (`REdis` Serialization Protocol) value types

use crate::error::{CacheError, CacheResult};
use bytes::Bytes;

/// RESP protocol value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(String),
    /// Error: -ERR message\r\n
    Error(String),
    /// Integer: :1000\r\n
    Integer(i64),
    /// Bulk string: $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// Null bulk string ($-1\r\n) or null array (*-1\r\n)
    Null,
    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Convert to a string if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to a string.
    pub fn as_string(&self) -> CacheResult<String> {
        match self {
            Self::SimpleString(s) => Ok(s.clone()),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| CacheError::Type(format!("Invalid UTF-8: {e}"))),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Null => Err(CacheError::Type("Value is null".to_string())),
            _ => Err(CacheError::Type(format!(
                "Cannot convert {self:?} to string"
            ))),
        }
    }

    /// Convert to an integer if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to an integer.
    pub fn as_int(&self) -> CacheResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::BulkString(b) => std::str::from_utf8(b)
                .map_err(|e| CacheError::Type(format!("Invalid UTF-8: {e}")))?
                .parse::<i64>()
                .map_err(|e| CacheError::Type(format!("Cannot parse integer: {e}"))),
            _ => Err(CacheError::Type(format!(
                "Cannot convert {self:?} to integer"
            ))),
        }
    }

    /// Convert to bytes if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to bytes.
    pub fn as_bytes(&self) -> CacheResult<Bytes> {
        match self {
            Self::BulkString(b) => Ok(b.clone()),
            Self::SimpleString(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Self::Null => Err(CacheError::Type("Value is null".to_string())),
            _ => Err(CacheError::Type(format!(
                "Cannot convert {self:?} to bytes"
            ))),
        }
    }

    /// Take the elements of an array reply; a null array yields no elements
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an array.
    pub fn into_array(self) -> CacheResult<Vec<Self>> {
        match self {
            Self::Array(items) => Ok(items),
            Self::Null => Ok(Vec::new()),
            other => Err(CacheError::Type(format!(
                "Cannot convert {other:?} to array"
            ))),
        }
    }

    /// Check if this is a null value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}

impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        Self::BulkString(Bytes::from(i.to_string()))
    }
}

impl From<u64> for RespValue {
    fn from(i: u64) -> Self {
        Self::BulkString(Bytes::from(i.to_string()))
    }
}

impl From<Vec<u8>> for RespValue {
    fn from(b: Vec<u8>) -> Self {
        Self::BulkString(Bytes::from(b))
    }
}

impl From<Bytes> for RespValue {
    fn from(b: Bytes) -> Self {
        Self::BulkString(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_not_empty() {
        assert!(RespValue::Null.is_null());
        assert!(!RespValue::BulkString(Bytes::new()).is_null());
        assert!(!RespValue::Array(vec![]).is_null());
    }

    #[test]
    fn test_integer_arguments_are_bulk() {
        assert_eq!(RespValue::from(60_i64), RespValue::BulkString(Bytes::from("60")));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(RespValue::BulkString(Bytes::from("42")).as_int().unwrap(), 42);
        assert_eq!(RespValue::Integer(7).as_string().unwrap(), "7");
        assert!(RespValue::Null.as_string().is_err());
        assert!(RespValue::Null.into_array().unwrap().is_empty());
        assert!(RespValue::from("abc").into_array().is_err());
    }
}
