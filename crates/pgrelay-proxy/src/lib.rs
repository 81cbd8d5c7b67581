//! # pgrelay-proxy
//!
//! The pgrelay session engine: listeners that accept PostgreSQL
//! clients, hand the startup exchange to an authentication plugin, and
//! then relay the wire protocol byte-for-byte in both directions.
//!
//! ## Architecture
//!
//! ```text
//! psql / app
//!      │
//!      │ startup (optionally SSLRequest + TLS)
//!      ▼
//! ┌──────────────────┐
//! │  Listener        │  negotiate SSL, validate startup, dial target
//! │  Session         │
//! │   1. authenticate│  ← pgrelay-plugin
//! │   2. relay       │  two direction tasks, batched responses
//! └────────┬─────────┘
//!          │
//!          ▼
//!     target Postgres
//! ```
//!
//! A session moves through four phases (`Authenticating`, `Proxying`,
//! `Stopping`, `Stopped`). The first relay direction to end claims the
//! stop and its exit reason becomes the session's outcome; the other
//! direction's teardown fallout is discarded.
//!
//! ## Usage
//!
//! ```no_run
//! use std::collections::HashMap;
//! use pgrelay_core::ListenerConfig;
//! use pgrelay_proxy::Listener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ListenerConfig {
//!         bind: "127.0.0.1:5433".to_string(),
//!         ..Default::default()
//!     };
//!     let listener = Listener::new(config, &HashMap::new())?;
//!     listener.run().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod listener;
pub mod relay;
pub mod session;
pub mod tls;

pub use error::{ProxyError, SessionError};
pub use listener::Listener;
pub use relay::{FLUSH_THRESHOLD, SessionPhase};
pub use session::Session;
