//! JSON-lines session log on disk.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use pgrelay_core::ConfigMap;
use serde_json::{Map, Value};

use crate::context::{LogLevel, LoggingContext};
use crate::error::PluginError;
use crate::logging::LoggingPlugin;

/// Appends one JSON object per event: `time`, `level`, `msg`, then the
/// context fields in order.
///
/// Options: `path` (required), `level` (minimum level, default
/// `debug`).
#[derive(Debug)]
pub struct FileLogger {
    path: PathBuf,
    min_level: LogLevel,
}

impl FileLogger {
    /// Open the log for appending once to fail fast on a bad path.
    pub fn create(path: impl Into<PathBuf>, min_level: LogLevel) -> Result<Self, PluginError> {
        let path = path.into();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| {
                PluginError::Config(format!(
                    "cannot open log file {}: {source}",
                    path.display()
                ))
            })?;
        Ok(Self { path, min_level })
    }

    pub fn from_config(options: &ConfigMap) -> Result<Self, PluginError> {
        let path = options
            .get_str("path")
            .ok_or_else(|| PluginError::Config("file logger requires a path".into()))?;
        let min_level = options.get_str_or("level", "debug").parse()?;
        Self::create(path, min_level)
    }
}

#[async_trait]
impl LoggingPlugin for FileLogger {
    fn name(&self) -> &'static str {
        "file"
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
        let mut line = Map::new();
        line.insert("time".into(), Value::from(Utc::now().to_rfc3339()));
        line.insert("level".into(), Value::from(level.as_str()));
        line.insert("msg".into(), Value::from(message));
        for (key, value) in context.fields() {
            line.insert(key.clone(), value.clone());
        }
        let rendered = serde_json::to_string(&Value::Object(line))
            .map_err(|e| PluginError::Internal(e.into()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{rendered}")?;
        Ok(())
    }
}
