//! Shared framing primitives for the v3 wire protocol.
//!
//! Regular messages are framed as a one-byte ASCII tag followed by a
//! big-endian `i32` length that covers itself and the body:
//!
//! ```text
//! +------+----------------+=================+
//! | tag  | length (i32)   | body            |
//! +------+----------------+=================+
//! ```
//!
//! The startup message is the one exception: it has no tag, just the
//! length followed by the body.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use crate::error::ProtoError;

/// Protocol version 3.0 as sent in the startup message.
pub const PROTOCOL_VERSION: i32 = 196608;

/// Magic code a client sends to request SSL negotiation.
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Magic code for a cancel-request connection.
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Magic code for GSSAPI encryption negotiation.
pub const GSSENC_REQUEST_CODE: i32 = 80877104;

/// Upper bound on a declared message length. Anything larger is treated
/// as a framing error rather than an allocation request.
pub const MAX_MESSAGE_LEN: usize = 1 << 30;

/// A parsed protocol message that can be re-encoded and described.
///
/// `encode` must reproduce the exact bytes the message was parsed from,
/// so the proxy never rewrites traffic it forwards. `fields` is the
/// structured form attached to per-message log events.
pub trait Message {
    /// Wire-level message name, e.g. `Query` or `ReadyForQuery`.
    fn name(&self) -> &'static str;

    /// Append the complete frame (tag, length, body) to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Structured description for logging. Never includes credentials.
    fn fields(&self) -> Map<String, Value>;
}

/// A message the proxy forwards without interpreting its body.
///
/// The body is kept verbatim so re-encoding is byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub tag: u8,
    pub body: Bytes,
}

impl RawMessage {
    pub fn new(tag: u8, body: Bytes) -> Self {
        Self { tag, body }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag);
        buf.put_i32(self.body.len() as i32 + 4);
        buf.put_slice(&self.body);
    }

    pub(crate) fn fields_named(&self, name: &'static str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".into(), Value::from(name));
        map.insert("length".into(), Value::from(self.body.len()));
        map
    }
}

/// Cursor over a message body during decoding.
pub(crate) struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, ProtoError> {
        if self.remaining() < 1 {
            return Err(ProtoError::Malformed("body truncated reading byte".into()));
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32, ProtoError> {
        if self.remaining() < 4 {
            return Err(ProtoError::Malformed("body truncated reading i32".into()));
        }
        let raw: [u8; 4] = self.buf[self.pos..self.pos + 4]
            .try_into()
            .map_err(|_| ProtoError::Malformed("body truncated reading i32".into()))?;
        self.pos += 4;
        Ok(i32::from_be_bytes(raw))
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    pub(crate) fn read_cstr(&mut self) -> Result<String, ProtoError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ProtoError::Malformed("unterminated string in body".into()))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| ProtoError::Malformed("invalid utf-8 in body string".into()))?
            .to_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    /// Fail unless the whole body has been consumed.
    pub(crate) fn expect_end(&self, what: &str) -> Result<(), ProtoError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(ProtoError::Malformed(format!(
                "{} bytes trailing after {what}",
                self.remaining()
            )))
        }
    }
}

pub(crate) fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_reader_cstr() {
        let mut r = BodyReader::new(b"user\0alice\0");
        assert_eq!(r.read_cstr().unwrap(), "user");
        assert_eq!(r.read_cstr().unwrap(), "alice");
        assert!(r.expect_end("options").is_ok());
    }

    #[test]
    fn test_body_reader_unterminated() {
        let mut r = BodyReader::new(b"oops");
        assert!(r.read_cstr().is_err());
    }

    #[test]
    fn test_body_reader_trailing_bytes() {
        let mut r = BodyReader::new(b"x\0y");
        r.read_cstr().unwrap();
        assert!(r.expect_end("test body").is_err());
    }

    #[test]
    fn test_raw_message_roundtrip_bytes() {
        let raw = RawMessage::new(b'D', Bytes::from_static(b"\x00\x01abc"));
        let mut buf = BytesMut::new();
        raw.encode(&mut buf);
        assert_eq!(&buf[..], b"D\x00\x00\x00\x09\x00\x01abc");
    }
}
