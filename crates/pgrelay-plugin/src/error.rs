use pgrelay_proto::{AuthMethod, ProtoError};
use thiserror::Error;

/// Errors surfaced by plugins and the handshake operations they drive.
///
/// `UnexpectedMessage` and `ConnectionClosed` are protocol violations
/// by the peer; `Config` is an operator mistake caught at build time;
/// the rest are infrastructure failures.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("protocol error during authentication: {0}")]
    Protocol(#[from] ProtoError),

    #[error("unexpected {got} message, expected {expected}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    #[error("connection closed during authentication")]
    ConnectionClosed,

    #[error("unsupported authentication method {0}")]
    UnsupportedMethod(AuthMethod),

    #[error("plugin configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
