//! Value serialization strategies
//!
//! A [`CacheClient`](crate::CacheClient) is generic over the type it caches
//! and over the strategy that turns values into bytes. [`JsonSerializer`] is
//! the default and matches what other clients of the same keyspace expect.

use cachewire_core::error::{CacheError, CacheResult};
use serde::{de::DeserializeOwned, Serialize};

/// Turns cached values into bytes and back
pub trait ValueSerializer<T>: Send + Sync {
    /// Encode a value for storage
    fn serialize(&self, value: &T) -> CacheResult<Vec<u8>>;

    /// Decode a stored payload
    fn deserialize(&self, bytes: &[u8]) -> CacheResult<T>;
}

/// JSON via `serde_json`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> ValueSerializer<T> for JsonSerializer
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> CacheResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Trade {
        id: u32,
        symbol: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_json_round_trip() {
        let trade = Trade {
            id: 7,
            symbol: "SOL".to_string(),
            tags: vec!["spot".to_string()],
        };
        let bytes = JsonSerializer.serialize(&trade).unwrap();
        let back: Trade = JsonSerializer.deserialize(&bytes).unwrap();
        assert_eq!(back, trade);
    }

    #[test]
    fn test_json_rejects_garbage() {
        let result: CacheResult<Trade> = JsonSerializer.deserialize(b"not json");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
