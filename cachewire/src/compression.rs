//! Payload compression
//!
//! Large payloads can be gzip-compressed before they are stored. The
//! compressed bytes are base64-encoded and wrapped in a small JSON envelope:
//!
//! ```text
//! {"_compressed":true,"data":"H4sIAAAAAAAA..."}
//! ```
//!
//! Readers check for the envelope and unwrap it transparently, so compressed
//! and plain entries can live side by side in the same namespace.

use base64::{engine::general_purpose::STANDARD, Engine};
use cachewire_core::error::{CacheError, CacheResult};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const ENVELOPE_MARKER: &[u8] = b"\"_compressed\"";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "_compressed")]
    compressed: bool,
    data: String,
}

/// Gzip `payload` and wrap it in the envelope
pub fn compress(payload: &[u8]) -> CacheResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    let gzipped = encoder
        .finish()
        .map_err(|e| CacheError::Compression(e.to_string()))?;

    let envelope = Envelope {
        compressed: true,
        data: STANDARD.encode(gzipped),
    };
    serde_json::to_vec(&envelope).map_err(|e| CacheError::Serialization(e.to_string()))
}

/// If `payload` is an envelope, return the decompressed bytes
///
/// Returns `Ok(None)` for anything that is not an envelope.
pub fn decompress(payload: &[u8]) -> CacheResult<Option<Vec<u8>>> {
    if !looks_like_envelope(payload) {
        return Ok(None);
    }
    let envelope: Envelope = match serde_json::from_slice(payload) {
        Ok(envelope) => envelope,
        // An object that merely mentions the marker
        Err(_) => return Ok(None),
    };
    if !envelope.compressed {
        return Ok(None);
    }

    let gzipped = STANDARD
        .decode(envelope.data.as_bytes())
        .map_err(|e| CacheError::Compression(format!("invalid base64: {}", e)))?;
    let mut decoder = GzDecoder::new(gzipped.as_slice());
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    Ok(Some(out))
}

fn looks_like_envelope(payload: &[u8]) -> bool {
    payload.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{')
        && payload
            .windows(ENVELOPE_MARKER.len())
            .any(|w| w == ENVELOPE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let wrapped = compress(b"{\"a\":1}").unwrap();
        let value: serde_json::Value = serde_json::from_slice(&wrapped).unwrap();
        assert_eq!(value["_compressed"], serde_json::Value::Bool(true));
        assert!(value["data"].is_string());
    }

    #[test]
    fn test_compress_then_decompress() {
        let payload = "x".repeat(4096).into_bytes();
        let wrapped = compress(&payload).unwrap();
        assert!(wrapped.len() < payload.len());
        assert_eq!(decompress(&wrapped).unwrap(), Some(payload));
    }

    #[test]
    fn test_plain_payload_passes_through() {
        assert_eq!(decompress(b"{\"a\":1}").unwrap(), None);
        assert_eq!(decompress(b"\"_compressed\"").unwrap(), None);
        assert_eq!(decompress(b"[1,2,3]").unwrap(), None);
        assert_eq!(
            decompress(b"{\"_compressed\":false,\"data\":\"\"}").unwrap(),
            None
        );
    }

    #[test]
    fn test_corrupt_envelope_errors() {
        let result = decompress(b"{\"_compressed\":true,\"data\":\"!!!\"}");
        assert!(matches!(result, Err(CacheError::Compression(_))));
    }
}
