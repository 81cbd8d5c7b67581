//! Messages sent by a frontend (the connecting client).

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use crate::error::ProtoError;
use crate::message::{
    BodyReader, Message, RawMessage, put_cstr, PROTOCOL_VERSION, SSL_REQUEST_CODE,
};

/// Frontend tags forwarded without body interpretation: Bind, Close,
/// CopyDone, CopyData, Describe, Execute, CopyFail, FunctionCall,
/// Flush, Parse, Sync.
const CLIENT_RAW_TAGS: &[u8] = b"BCcdDEfFHPS";

/// The first message on a connection: either an SSL negotiation request
/// or a protocol 3.0 startup carrying ordered key/value options.
///
/// Option order is preserved so re-encoding reproduces the original
/// byte sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    pub ssl_request: bool,
    pub options: Vec<(String, String)>,
}

impl StartupMessage {
    pub fn new(options: Vec<(String, String)>) -> Self {
        Self { ssl_request: false, options }
    }

    pub fn ssl() -> Self {
        Self { ssl_request: true, options: Vec::new() }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn user(&self) -> Option<&str> {
        self.option("user")
    }

    pub fn database(&self) -> Option<&str> {
        self.option("database")
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::new(body);
        let code = r.read_i32()?;
        match code {
            SSL_REQUEST_CODE => {
                r.expect_end("ssl request")?;
                Ok(Self::ssl())
            }
            PROTOCOL_VERSION => {
                let mut options = Vec::new();
                loop {
                    let key = r.read_cstr()?;
                    if key.is_empty() {
                        break;
                    }
                    let value = r.read_cstr()?;
                    options.push((key, value));
                }
                r.expect_end("startup options")?;
                Ok(Self::new(options))
            }
            other => Err(ProtoError::UnsupportedStartup { code: other }),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        if self.ssl_request {
            buf.put_i32(8);
            buf.put_i32(SSL_REQUEST_CODE);
            return;
        }
        let body_len: usize = 4
            + self
                .options
                .iter()
                .map(|(k, v)| k.len() + v.len() + 2)
                .sum::<usize>()
            + 1;
        buf.put_i32(body_len as i32 + 4);
        buf.put_i32(PROTOCOL_VERSION);
        for (k, v) in &self.options {
            put_cstr(buf, k);
            put_cstr(buf, v);
        }
        buf.put_u8(0);
    }

    fn fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".into(), Value::from("StartupMessage"));
        map.insert("ssl_request".into(), Value::from(self.ssl_request));
        let mut options = Map::new();
        for (k, v) in &self.options {
            options.insert(k.clone(), Value::from(v.as_str()));
        }
        map.insert("options".into(), Value::Object(options));
        map
    }
}

/// A `p` message. The same tag carries cleartext passwords, MD5
/// responses, and SASL responses, so the body is kept verbatim and
/// only interpreted by whoever asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordMessage {
    pub body: Bytes,
}

impl PasswordMessage {
    pub fn new(body: Bytes) -> Self {
        Self { body }
    }

    /// Build the cleartext/MD5 form: the text followed by a NUL.
    pub fn cleartext(password: &str) -> Self {
        let mut body = BytesMut::with_capacity(password.len() + 1);
        body.put_slice(password.as_bytes());
        body.put_u8(0);
        Self { body: body.freeze() }
    }

    /// The credential bytes with the trailing NUL stripped, which is
    /// the cleartext and MD5 form. SASL responses need the raw body.
    pub fn password(&self) -> &[u8] {
        match self.body.last() {
            Some(0) => &self.body[..self.body.len() - 1],
            _ => &self.body[..],
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(b'p');
        buf.put_i32(self.body.len() as i32 + 4);
        buf.put_slice(&self.body);
    }
}

/// A simple-protocol `Q` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMessage {
    pub query: String,
}

impl QueryMessage {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into() }
    }

    pub(crate) fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::new(body);
        let query = r.read_cstr()?;
        r.expect_end("query text")?;
        Ok(Self { query })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(b'Q');
        buf.put_i32(self.query.len() as i32 + 5);
        put_cstr(buf, &self.query);
    }
}

/// Everything a frontend may send, as a closed set.
///
/// Messages the relay loop makes decisions on (`Startup`, `Password`,
/// `Query`, `Terminate`) are fully parsed; the rest ride through as
/// [`RawMessage`]. Unknown tags are rejected during decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Startup(StartupMessage),
    Password(PasswordMessage),
    Query(QueryMessage),
    Terminate,
    Other(RawMessage),
}

impl ClientMessage {
    pub(crate) fn decode_tagged(tag: u8, body: Bytes) -> Result<Self, ProtoError> {
        match tag {
            b'p' => Ok(Self::Password(PasswordMessage::new(body))),
            b'Q' => Ok(Self::Query(QueryMessage::decode(&body)?)),
            b'X' => {
                if body.is_empty() {
                    Ok(Self::Terminate)
                } else {
                    Err(ProtoError::Malformed("terminate carries a body".into()))
                }
            }
            t if CLIENT_RAW_TAGS.contains(&t) => Ok(Self::Other(RawMessage::new(tag, body))),
            t => Err(ProtoError::UnknownTag { tag: t, origin: "client" }),
        }
    }
}

impl Message for ClientMessage {
    fn name(&self) -> &'static str {
        match self {
            Self::Startup(_) => "StartupMessage",
            Self::Password(_) => "PasswordMessage",
            Self::Query(_) => "Query",
            Self::Terminate => "Terminate",
            Self::Other(raw) => client_tag_name(raw.tag),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Startup(m) => m.encode(buf),
            Self::Password(m) => m.encode(buf),
            Self::Query(m) => m.encode(buf),
            Self::Terminate => {
                buf.put_u8(b'X');
                buf.put_i32(4);
            }
            Self::Other(raw) => raw.encode(buf),
        }
    }

    fn fields(&self) -> Map<String, Value> {
        match self {
            Self::Startup(m) => m.fields(),
            // Credential bytes never reach the log stream.
            Self::Password(_) => {
                let mut map = Map::new();
                map.insert("type".into(), Value::from("PasswordMessage"));
                map
            }
            Self::Query(m) => {
                let mut map = Map::new();
                map.insert("type".into(), Value::from("Query"));
                map.insert("query".into(), Value::from(m.query.as_str()));
                map
            }
            Self::Terminate => {
                let mut map = Map::new();
                map.insert("type".into(), Value::from("Terminate"));
                map
            }
            Self::Other(raw) => raw.fields_named(client_tag_name(raw.tag)),
        }
    }
}

fn client_tag_name(tag: u8) -> &'static str {
    match tag {
        b'B' => "Bind",
        b'C' => "Close",
        b'c' => "CopyDone",
        b'd' => "CopyData",
        b'D' => "Describe",
        b'E' => "Execute",
        b'f' => "CopyFail",
        b'F' => "FunctionCall",
        b'H' => "Flush",
        b'P' => "Parse",
        b'p' => "PasswordMessage",
        b'Q' => "Query",
        b'S' => "Sync",
        b'X' => "Terminate",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_roundtrip_preserves_option_order() {
        let startup = StartupMessage::new(vec![
            ("user".into(), "alice".into()),
            ("database".into(), "app".into()),
            ("application_name".into(), "psql".into()),
        ]);
        let mut buf = BytesMut::new();
        startup.encode(&mut buf);
        let decoded = StartupMessage::decode(&buf[4..]).unwrap();
        assert_eq!(decoded, startup);
        assert_eq!(decoded.user(), Some("alice"));
        assert_eq!(decoded.database(), Some("app"));
    }

    #[test]
    fn test_startup_encoded_bytes() {
        let startup = StartupMessage::new(vec![("user".into(), "u".into())]);
        let mut buf = BytesMut::new();
        startup.encode(&mut buf);
        // length(4) + version(4) + "user\0u\0" (7) + terminator(1) = 16
        assert_eq!(&buf[..4], &16i32.to_be_bytes());
        assert_eq!(&buf[4..8], &PROTOCOL_VERSION.to_be_bytes());
        assert_eq!(&buf[8..], b"user\0u\0\0");
    }

    #[test]
    fn test_ssl_request_decode() {
        let mut buf = BytesMut::new();
        StartupMessage::ssl().encode(&mut buf);
        let decoded = StartupMessage::decode(&buf[4..]).unwrap();
        assert!(decoded.ssl_request);
        assert!(decoded.options.is_empty());
    }

    #[test]
    fn test_cancel_request_rejected() {
        let body = 80877102i32.to_be_bytes();
        let err = StartupMessage::decode(&body).unwrap_err();
        assert!(matches!(err, ProtoError::UnsupportedStartup { code: 80877102 }));
    }

    #[test]
    fn test_password_trailing_nul_stripped() {
        let msg = PasswordMessage::cleartext("hunter2");
        assert_eq!(msg.password(), b"hunter2");
        assert_eq!(msg.body.len(), 8);
    }

    #[test]
    fn test_password_fields_redacted() {
        let msg = ClientMessage::Password(PasswordMessage::cleartext("hunter2"));
        let fields = msg.fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["type"], "PasswordMessage");
    }

    #[test]
    fn test_query_roundtrip() {
        let msg = ClientMessage::Query(QueryMessage::new("SELECT 1"));
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert_eq!(buf[0], b'Q');
        let body = Bytes::copy_from_slice(&buf[5..]);
        let decoded = ClientMessage::decode_tagged(b'Q', body).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_terminate_rejects_body() {
        let err = ClientMessage::decode_tagged(b'X', Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, ProtoError::Malformed(_)));
    }

    #[test]
    fn test_other_keeps_body_verbatim() {
        let body = Bytes::from_static(b"portal\0stmt\0\x00\x00");
        let msg = ClientMessage::decode_tagged(b'B', body.clone()).unwrap();
        let ClientMessage::Other(raw) = &msg else {
            panic!("expected raw message");
        };
        assert_eq!(raw.body, body);
        assert_eq!(msg.name(), "Bind");
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        assert_eq!(buf[0], b'B');
        assert_eq!(&buf[5..], &body[..]);
    }

    #[test]
    fn test_unknown_client_tag_rejected() {
        let err = ClientMessage::decode_tagged(b'z', Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtoError::UnknownTag { tag: b'z', origin: "client" }));
    }
}
