use thiserror::Error;

/// Errors produced while reading, decoding, or writing protocol frames.
///
/// A cleanly closed stream at a frame boundary is *not* an error; the
/// read functions signal it with `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid message length {length}")]
    InvalidLength { length: i32 },

    #[error("unknown {origin} message tag 0x{tag:02x}")]
    UnknownTag { tag: u8, origin: &'static str },

    #[error("unsupported startup request code {code}")]
    UnsupportedStartup { code: i32 },

    #[error("connection closed mid-frame while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("unknown authentication method code {code}")]
    UnknownAuthMethod { code: i32 },

    #[error("malformed message: {0}")]
    Malformed(String),
}
