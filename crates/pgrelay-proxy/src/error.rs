use std::path::PathBuf;

use thiserror::Error;

use pgrelay_core::ConfigError;
use pgrelay_plugin::PluginError;
use pgrelay_proto::ProtoError;

/// Errors raised while running a single proxied session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The OS random source refused to produce a session identifier.
    #[error("failed to generate session identity: {0}")]
    Identity(String),

    /// The OS random source refused to produce an MD5 salt.
    #[error("failed to generate session salt: {0}")]
    Salt(String),

    /// `handle` was invoked on a session that already ran.
    #[error("session already started")]
    AlreadyStarted,

    /// The authenticator backed out with a hard failure.
    #[error("authentication failed: {0}")]
    Auth(#[source] PluginError),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

/// Errors raised by a listener while accepting and setting up
/// connections, before or around the session itself.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind listener on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("failed to connect to target {address}: {source}")]
    TargetConnect {
        address: String,
        source: std::io::Error,
    },

    #[error("failed to read tls file {path}: {source}")]
    TlsFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The key file parsed cleanly but held no private key.
    #[error("no private key found in {path}")]
    TlsKeyMissing { path: PathBuf },

    #[error("tls configuration rejected: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// The client's startup packet lacked a parameter the proxy needs
    /// before it can dial the target.
    #[error("startup message is missing the {option:?} option")]
    MissingStartupOption { option: &'static str },

    /// The first message on the wire was not a startup packet.
    #[error("expected a startup message, got {got}")]
    UnexpectedStartup { got: &'static str },

    /// The listener requires TLS and the client declined to negotiate it.
    #[error("this listener only accepts ssl connections")]
    SslRequired,

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
