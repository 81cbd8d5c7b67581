//! Session logging through the process-wide `tracing` subscriber.

use async_trait::async_trait;
use pgrelay_core::ConfigMap;

use crate::context::{LogLevel, LoggingContext};
use crate::error::PluginError;
use crate::logging::LoggingPlugin;

/// Forwards session events to `tracing` at the mapped level.
///
/// Options: `level` (minimum level, default `info`).
pub struct ConsoleLogger {
    min_level: LogLevel,
}

impl ConsoleLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    pub fn from_config(options: &ConfigMap) -> Result<Self, PluginError> {
        let min_level = options.get_str_or("level", "info").parse()?;
        Ok(Self::new(min_level))
    }
}

#[async_trait]
impl LoggingPlugin for ConsoleLogger {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn log(
        &self,
        level: LogLevel,
        context: &LoggingContext,
        message: &str,
    ) -> Result<(), PluginError> {
        if level < self.min_level {
            return Ok(());
        }
        match level {
            LogLevel::Debug => tracing::debug!(%context, "{}", message),
            LogLevel::Info => tracing::info!(%context, "{}", message),
            LogLevel::Warn => tracing::warn!(%context, "{}", message),
            LogLevel::Error => tracing::error!(%context, "{}", message),
        }
        Ok(())
    }
}
