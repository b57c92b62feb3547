//! RESP2 protocol implementation
//!
//! This module implements the Redis Serialization Protocol (RESP2) for
//! encoding requests and decoding replies.
//!
//! Requests are always multi-bulk arrays of bulk strings. Replies are decoded
//! incrementally: [`RespDecoder`] consumes every element as soon as it is
//! complete and keeps the arrays it is still filling on an explicit stack, so
//! a partially received reply never causes already-consumed bytes to be
//! parsed again.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use cachewire_core::{
    error::{CacheError, CacheResult},
    value::RespValue,
};

const CRLF: &[u8] = b"\r\n";

/// Encodes RESP values and requests into bytes
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value into a buffer
    pub fn encode(value: &RespValue, buf: &mut BytesMut) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => Self::put_bulk(data, buf),
            RespValue::Null => {
                buf.put_slice(b"$-1\r\n");
            }
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in arr {
                    Self::encode(item, buf);
                }
            }
        }
    }

    /// Encode a command with arguments as a multi-bulk request
    ///
    /// # Errors
    ///
    /// Returns a protocol error if an argument has no bulk-string form
    /// (null, error or array values).
    pub fn encode_command(command: &str, args: &[RespValue]) -> CacheResult<Bytes> {
        let mut buf = BytesMut::with_capacity(16 + command.len() + args.len() * 16);
        Self::encode_command_into(command, args, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Append a multi-bulk request to an existing buffer
    ///
    /// # Errors
    ///
    /// See [`RespEncoder::encode_command`].
    pub fn encode_command_into(
        command: &str,
        args: &[RespValue],
        buf: &mut BytesMut,
    ) -> CacheResult<()> {
        buf.put_u8(b'*');
        buf.put_slice((1 + args.len()).to_string().as_bytes());
        buf.put_slice(CRLF);

        Self::put_bulk(command.as_bytes(), buf);

        for arg in args {
            match arg {
                RespValue::BulkString(data) => Self::put_bulk(data, buf),
                RespValue::SimpleString(s) => Self::put_bulk(s.as_bytes(), buf),
                RespValue::Integer(i) => Self::put_bulk(i.to_string().as_bytes(), buf),
                other => {
                    return Err(CacheError::Protocol(format!(
                        "{other:?} cannot be sent as a command argument"
                    )))
                }
            }
        }
        Ok(())
    }

    fn put_bulk(data: &[u8], buf: &mut BytesMut) {
        buf.put_u8(b'$');
        buf.put_slice(data.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(data);
        buf.put_slice(CRLF);
    }
}

/// An array whose header has been consumed but whose elements are still arriving
#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<RespValue>,
}

/// Result of looking at the next element in the buffer
enum Element {
    Incomplete,
    Value(RespValue),
    ArrayHeader(usize),
}

/// Incremental RESP reply decoder
///
/// One decoder belongs to one inbound byte stream. Call [`RespDecoder::decode`]
/// after every read; it returns `Ok(None)` until a whole reply is available.
#[derive(Debug, Default)]
pub struct RespDecoder {
    stack: Vec<PartialArray>,
}

impl RespDecoder {
    /// Create a decoder with no partial state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the decoder is in the middle of an array
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Decode the next complete reply from `buf`
    ///
    /// Bytes of completed elements are removed from `buf`; bytes of an
    /// incomplete element are left in place for the next call.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for unknown type bytes, malformed lengths or a
    /// bulk string without its trailing CRLF. The stream is unusable afterwards.
    pub fn decode(&mut self, buf: &mut BytesMut) -> CacheResult<Option<RespValue>> {
        loop {
            let mut value = match Self::decode_element(buf)? {
                Element::Incomplete => return Ok(None),
                Element::Value(value) => value,
                Element::ArrayHeader(0) => RespValue::Array(Vec::new()),
                Element::ArrayHeader(len) => {
                    self.stack.push(PartialArray {
                        remaining: len,
                        items: Vec::with_capacity(len.min(1024)),
                    });
                    continue;
                }
            };

            // Fold the finished element into its enclosing arrays
            loop {
                let Some(frame) = self.stack.last_mut() else {
                    return Ok(Some(value));
                };
                frame.items.push(value);
                frame.remaining -= 1;
                if frame.remaining > 0 {
                    break;
                }
                let items = std::mem::take(&mut frame.items);
                self.stack.pop();
                value = RespValue::Array(items);
            }
        }
    }

    fn decode_element(buf: &mut BytesMut) -> CacheResult<Element> {
        let Some(&type_byte) = buf.first() else {
            return Ok(Element::Incomplete);
        };
        if !matches!(type_byte, b'+' | b'-' | b':' | b'$' | b'*') {
            return Err(CacheError::Protocol(format!(
                "Invalid RESP type byte: {:?}",
                type_byte as char
            )));
        }
        let Some(line_end) = find_crlf(buf) else {
            return Ok(Element::Incomplete);
        };
        let header_len = line_end + 2;

        match type_byte {
            b'+' => {
                let line = utf8_line(&buf[1..line_end])?;
                buf.advance(header_len);
                Ok(Element::Value(RespValue::SimpleString(line)))
            }
            b'-' => {
                let line = utf8_line(&buf[1..line_end])?;
                buf.advance(header_len);
                Ok(Element::Value(RespValue::Error(line)))
            }
            b':' => {
                let num = parse_number(&buf[1..line_end], "integer")?;
                buf.advance(header_len);
                Ok(Element::Value(RespValue::Integer(num)))
            }
            b'$' => {
                let len = parse_number(&buf[1..line_end], "bulk string length")?;
                if len == -1 {
                    buf.advance(header_len);
                    return Ok(Element::Value(RespValue::Null));
                }
                let len = usize::try_from(len).map_err(|_| {
                    CacheError::Protocol(format!("Invalid bulk string length: {len}"))
                })?;

                // Length-prefixed: the payload may contain CR/LF
                if buf.len() < header_len + len + 2 {
                    return Ok(Element::Incomplete);
                }
                if &buf[header_len + len..header_len + len + 2] != CRLF {
                    return Err(CacheError::Protocol(
                        "Bulk string is not terminated by CRLF".to_string(),
                    ));
                }
                buf.advance(header_len);
                let data = buf.split_to(len).freeze();
                buf.advance(2);
                Ok(Element::Value(RespValue::BulkString(data)))
            }
            b'*' => {
                let len = parse_number(&buf[1..line_end], "array length")?;
                buf.advance(header_len);
                if len == -1 {
                    return Ok(Element::Value(RespValue::Null));
                }
                let len = usize::try_from(len)
                    .map_err(|_| CacheError::Protocol(format!("Invalid array length: {len}")))?;
                Ok(Element::ArrayHeader(len))
            }
            _ => unreachable!("type byte validated above"),
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn utf8_line(line: &[u8]) -> CacheResult<String> {
    String::from_utf8(line.to_vec())
        .map_err(|e| CacheError::Protocol(format!("Invalid UTF-8: {}", e)))
}

fn parse_number(line: &[u8], what: &str) -> CacheResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            CacheError::Protocol(format!(
                "Invalid {}: {:?}",
                what,
                String::from_utf8_lossy(line)
            ))
        })
}
