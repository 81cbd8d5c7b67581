//! Messages sent by a backend (the proxied server).

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use crate::error::ProtoError;
use crate::message::{BodyReader, Message, RawMessage, put_cstr};

/// Backend tags forwarded without body interpretation: ParseComplete,
/// BindComplete, CloseComplete, NotificationResponse, CopyDone,
/// CommandComplete, CopyData, DataRow, CopyInResponse, CopyOutResponse,
/// EmptyQueryResponse, NoData, PortalSuspended, ParameterDescription,
/// RowDescription, NegotiateProtocolVersion, FunctionCallResponse,
/// CopyBothResponse.
const SERVER_RAW_TAGS: &[u8] = b"123AcCdDGHInstTvVW";

/// Authentication scheme carried by an `R` message, as a closed set of
/// explicit discriminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Ok,
    KerberosV5,
    CleartextPassword,
    Md5Password,
    ScmCredential,
    Gss,
    GssContinue,
    Sspi,
    Sasl,
    SaslContinue,
    SaslFinal,
}

impl AuthMethod {
    pub fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::KerberosV5 => 2,
            Self::CleartextPassword => 3,
            Self::Md5Password => 5,
            Self::ScmCredential => 6,
            Self::Gss => 7,
            Self::GssContinue => 8,
            Self::Sspi => 9,
            Self::Sasl => 10,
            Self::SaslContinue => 11,
            Self::SaslFinal => 12,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, ProtoError> {
        match code {
            0 => Ok(Self::Ok),
            2 => Ok(Self::KerberosV5),
            3 => Ok(Self::CleartextPassword),
            5 => Ok(Self::Md5Password),
            6 => Ok(Self::ScmCredential),
            7 => Ok(Self::Gss),
            8 => Ok(Self::GssContinue),
            9 => Ok(Self::Sspi),
            10 => Ok(Self::Sasl),
            11 => Ok(Self::SaslContinue),
            12 => Ok(Self::SaslFinal),
            other => Err(ProtoError::UnknownAuthMethod { code: other }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::KerberosV5 => "KerberosV5",
            Self::CleartextPassword => "CleartextPassword",
            Self::Md5Password => "MD5Password",
            Self::ScmCredential => "SCMCredential",
            Self::Gss => "GSS",
            Self::GssContinue => "GSSContinue",
            Self::Sspi => "SSPI",
            Self::Sasl => "SASL",
            Self::SaslContinue => "SASLContinue",
            Self::SaslFinal => "SASLFinal",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An `R` message: either an authentication challenge or the final Ok.
///
/// The payload after the method code (MD5 salt, SASL mechanism list,
/// continuation data) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationRequest {
    pub method: AuthMethod,
    pub payload: Bytes,
}

impl AuthenticationRequest {
    pub fn ok() -> Self {
        Self { method: AuthMethod::Ok, payload: Bytes::new() }
    }

    pub fn cleartext() -> Self {
        Self { method: AuthMethod::CleartextPassword, payload: Bytes::new() }
    }

    pub fn md5(salt: [u8; 4]) -> Self {
        Self {
            method: AuthMethod::Md5Password,
            payload: Bytes::copy_from_slice(&salt),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.method == AuthMethod::Ok
    }

    /// The 4-byte salt of an MD5 challenge.
    pub fn salt(&self) -> Option<[u8; 4]> {
        if self.method == AuthMethod::Md5Password && self.payload.len() == 4 {
            let mut salt = [0u8; 4];
            salt.copy_from_slice(&self.payload);
            Some(salt)
        } else {
            None
        }
    }

    fn decode(body: Bytes) -> Result<Self, ProtoError> {
        let mut r = BodyReader::new(&body);
        let method = AuthMethod::from_code(r.read_i32()?)?;
        Ok(Self { method, payload: body.slice(4..) })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(b'R');
        buf.put_i32(self.payload.len() as i32 + 8);
        buf.put_i32(self.method.code());
        buf.put_slice(&self.payload);
    }
}

/// A `Z` message; its arrival flushes the response batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyForQuery {
    /// Transaction status indicator: `I`, `T`, or `E`.
    pub status: u8,
}

impl ReadyForQuery {
    pub fn idle() -> Self {
        Self { status: b'I' }
    }

    fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::new(body);
        let status = r.read_u8()?;
        r.expect_end("ready-for-query status")?;
        Ok(Self { status })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(b'Z');
        buf.put_i32(5);
        buf.put_u8(self.status);
    }
}

/// An `E` message: ordered `(field code, value)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub fields: Vec<(u8, String)>,
}

impl ErrorResponse {
    /// The notice written to a client whose authentication was rejected.
    pub fn fatal(message: &str) -> Self {
        Self {
            fields: vec![(b'S', "Fatal".into()), (b'M', message.into())],
        }
    }

    pub fn severity(&self) -> Option<&str> {
        field(&self.fields, b'S')
    }

    pub fn message(&self) -> Option<&str> {
        field(&self.fields, b'M')
    }

    pub fn code(&self) -> Option<&str> {
        field(&self.fields, b'C')
    }

    fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self { fields: read_fields(body)? })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        put_field_message(buf, b'E', &self.fields);
    }
}

/// An `N` message, same field layout as [`ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeResponse {
    pub fields: Vec<(u8, String)>,
}

impl NoticeResponse {
    pub fn severity(&self) -> Option<&str> {
        field(&self.fields, b'S')
    }

    pub fn message(&self) -> Option<&str> {
        field(&self.fields, b'M')
    }

    fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self { fields: read_fields(body)? })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        put_field_message(buf, b'N', &self.fields);
    }
}

/// An `S` message reporting a runtime parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl ParameterStatus {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::new(body);
        let name = r.read_cstr()?;
        let value = r.read_cstr()?;
        r.expect_end("parameter status")?;
        Ok(Self { name, value })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(b'S');
        buf.put_i32((self.name.len() + self.value.len() + 6) as i32);
        put_cstr(buf, &self.name);
        put_cstr(buf, &self.value);
    }
}

/// A `K` message carrying the cancel key for this backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    pub process_id: i32,
    pub secret_key: i32,
}

impl BackendKeyData {
    fn decode(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::new(body);
        let process_id = r.read_i32()?;
        let secret_key = r.read_i32()?;
        r.expect_end("backend key data")?;
        Ok(Self { process_id, secret_key })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(b'K');
        buf.put_i32(12);
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
    }
}

/// Everything a backend may send, as a closed set.
///
/// The relay loop's flush decisions only ever look at `ReadyForQuery`
/// and `Authentication`; the other parsed forms exist for the handshake
/// and for structured logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Authentication(AuthenticationRequest),
    ReadyForQuery(ReadyForQuery),
    Error(ErrorResponse),
    Notice(NoticeResponse),
    ParameterStatus(ParameterStatus),
    BackendKeyData(BackendKeyData),
    Other(RawMessage),
}

impl ServerMessage {
    pub(crate) fn decode_tagged(tag: u8, body: Bytes) -> Result<Self, ProtoError> {
        match tag {
            b'R' => Ok(Self::Authentication(AuthenticationRequest::decode(body)?)),
            b'Z' => Ok(Self::ReadyForQuery(ReadyForQuery::decode(&body)?)),
            b'E' => Ok(Self::Error(ErrorResponse::decode(&body)?)),
            b'N' => Ok(Self::Notice(NoticeResponse::decode(&body)?)),
            b'S' => Ok(Self::ParameterStatus(ParameterStatus::decode(&body)?)),
            b'K' => Ok(Self::BackendKeyData(BackendKeyData::decode(&body)?)),
            t if SERVER_RAW_TAGS.contains(&t) => Ok(Self::Other(RawMessage::new(tag, body))),
            t => Err(ProtoError::UnknownTag { tag: t, origin: "target" }),
        }
    }
}

impl Message for ServerMessage {
    fn name(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AuthenticationRequest",
            Self::ReadyForQuery(_) => "ReadyForQuery",
            Self::Error(_) => "Error",
            Self::Notice(_) => "Notice",
            Self::ParameterStatus(_) => "ParameterStatus",
            Self::BackendKeyData(_) => "BackendKeyData",
            Self::Other(raw) => server_tag_name(raw.tag),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Authentication(m) => m.encode(buf),
            Self::ReadyForQuery(m) => m.encode(buf),
            Self::Error(m) => m.encode(buf),
            Self::Notice(m) => m.encode(buf),
            Self::ParameterStatus(m) => m.encode(buf),
            Self::BackendKeyData(m) => m.encode(buf),
            Self::Other(raw) => raw.encode(buf),
        }
    }

    fn fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        match self {
            Self::Authentication(m) => {
                map.insert("type".into(), Value::from("AuthenticationRequest"));
                map.insert("method".into(), Value::from(m.method.name()));
            }
            Self::ReadyForQuery(m) => {
                map.insert("type".into(), Value::from("ReadyForQuery"));
                map.insert("status".into(), Value::from((m.status as char).to_string()));
            }
            Self::Error(m) => {
                map.insert("type".into(), Value::from("Error"));
                if let Some(severity) = m.severity() {
                    map.insert("severity".into(), Value::from(severity));
                }
                if let Some(code) = m.code() {
                    map.insert("code".into(), Value::from(code));
                }
                if let Some(message) = m.message() {
                    map.insert("message".into(), Value::from(message));
                }
            }
            Self::Notice(m) => {
                map.insert("type".into(), Value::from("Notice"));
                if let Some(message) = m.message() {
                    map.insert("message".into(), Value::from(message));
                }
            }
            Self::ParameterStatus(m) => {
                map.insert("type".into(), Value::from("ParameterStatus"));
                map.insert("name".into(), Value::from(m.name.as_str()));
                map.insert("value".into(), Value::from(m.value.as_str()));
            }
            Self::BackendKeyData(m) => {
                map.insert("type".into(), Value::from("BackendKeyData"));
                map.insert("process_id".into(), Value::from(m.process_id));
            }
            Self::Other(raw) => return raw.fields_named(server_tag_name(raw.tag)),
        }
        map
    }
}

fn field<'a>(fields: &'a [(u8, String)], code: u8) -> Option<&'a str> {
    fields
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, v)| v.as_str())
}

fn read_fields(body: &[u8]) -> Result<Vec<(u8, String)>, ProtoError> {
    let mut r = BodyReader::new(body);
    let mut fields = Vec::new();
    loop {
        let code = r.read_u8()?;
        if code == 0 {
            break;
        }
        fields.push((code, r.read_cstr()?));
    }
    r.expect_end("error fields")?;
    Ok(fields)
}

fn put_field_message(buf: &mut BytesMut, tag: u8, fields: &[(u8, String)]) {
    let body_len: usize = fields.iter().map(|(_, v)| v.len() + 2).sum::<usize>() + 1;
    buf.put_u8(tag);
    buf.put_i32(body_len as i32 + 4);
    for (code, value) in fields {
        buf.put_u8(*code);
        put_cstr(buf, value);
    }
    buf.put_u8(0);
}

fn server_tag_name(tag: u8) -> &'static str {
    match tag {
        b'1' => "ParseComplete",
        b'2' => "BindComplete",
        b'3' => "CloseComplete",
        b'A' => "NotificationResponse",
        b'c' => "CopyDone",
        b'C' => "CommandComplete",
        b'd' => "CopyData",
        b'D' => "DataRow",
        b'E' => "Error",
        b'G' => "CopyInResponse",
        b'H' => "CopyOutResponse",
        b'I' => "EmptyQueryResponse",
        b'K' => "BackendKeyData",
        b'n' => "NoData",
        b'N' => "Notice",
        b'R' => "AuthenticationRequest",
        b's' => "PortalSuspended",
        b'S' => "ParameterStatus",
        b't' => "ParameterDescription",
        b'T' => "RowDescription",
        b'v' => "NegotiateProtocolVersion",
        b'V' => "FunctionCallResponse",
        b'W' => "CopyBothResponse",
        b'Z' => "ReadyForQuery",
        _ => "Unknown",
    }
}
