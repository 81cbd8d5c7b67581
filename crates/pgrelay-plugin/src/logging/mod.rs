//! Logging plugin seam.
//!
//! Session log events fan out to every configured [`LoggingPlugin`].
//! Delivery is best-effort: a failing plugin is reported through
//! `tracing` by the registry and never disturbs the session.

mod console;
mod file;

pub use console::ConsoleLogger;
pub use file::FileLogger;

use async_trait::async_trait;

use crate::context::{LogLevel, LoggingContext};
use crate::error::PluginError;

/// A sink for session log events.
#[async_trait]
pub trait LoggingPlugin: Send + Sync {
    /// Plugin name as used in the configuration file.
    fn name(&self) -> &'static str;

    async fn log(
        &self,
        level: LogLevel,
        context: &LoggingContext,
        message: &str,
    ) -> Result<(), PluginError>;
}
