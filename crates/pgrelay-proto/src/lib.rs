//! # pgrelay-proto
//!
//! PostgreSQL v3 wire protocol codec used by the pgrelay session engine.
//!
//! The codec is built for *forwarding*, not for implementing a server:
//! every message re-encodes to the exact bytes it was parsed from, and
//! only the handful of messages the relay loop makes decisions on are
//! parsed beyond their frame.
//!
//! ```text
//!  frontend                                      backend
//!     |  StartupMessage / p / Q / X / raw tags      |
//!     | ------------- ClientMessage -------------> |
//!     |                                             |
//!     |  R / Z / E / N / S / K / raw tags           |
//!     | <------------ ServerMessage -------------- |
//! ```
//!
//! Reads return `Ok(None)` on a cleanly closed stream; an EOF inside a
//! frame is a [`ProtoError`].

pub mod client;
pub mod error;
pub mod io;
pub mod message;
pub mod server;

pub use client::{ClientMessage, PasswordMessage, QueryMessage, StartupMessage};
pub use error::ProtoError;
pub use io::{read_client_message, read_server_message, write_batch, write_message};
pub use message::{
    Message, RawMessage, CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, MAX_MESSAGE_LEN,
    PROTOCOL_VERSION, SSL_REQUEST_CODE,
};
pub use server::{
    AuthMethod, AuthenticationRequest, BackendKeyData, ErrorResponse, NoticeResponse,
    ParameterStatus, ReadyForQuery, ServerMessage,
};
