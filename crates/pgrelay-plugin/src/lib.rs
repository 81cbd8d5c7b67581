//! # pgrelay-plugin
//!
//! The pluggable seams of the gateway: who may have a session
//! (authentication) and where session events go (logging). A
//! [`PluginRegistry`] bundles one authenticator with any number of
//! logging sinks and is injected into every session; nothing in this
//! crate is process-global.
//!
//! Built-in authenticators: `passthrough` (default), `trust`,
//! `password-file`. Built-in loggers: `console`, `file`.

pub mod auth;
pub mod context;
pub mod error;
pub mod logging;
pub mod registry;

pub use auth::{md5_response, AuthContext, Authenticator, PassthroughAuth, PasswordFileAuth, TrustAuth};
pub use context::{LogLevel, LoggingContext};
pub use error::PluginError;
pub use logging::{ConsoleLogger, FileLogger, LoggingPlugin};
pub use registry::{build_authenticator, build_logger, PluginRegistry};
