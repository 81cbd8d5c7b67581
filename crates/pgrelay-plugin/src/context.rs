//! Structured context attached to session log events.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::PluginError;

/// Severity of a session log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(PluginError::Config(format!("unknown log level {other:?}"))),
        }
    }
}

/// Ordered key/value fields describing the session a log event belongs
/// to, plus an optional structured `message` entry for the protocol
/// message being reported.
///
/// Insertion order is preserved so rendered lines keep a stable field
/// layout.
#[derive(Debug, Clone, Default)]
pub struct LoggingContext {
    fields: Map<String, Value>,
}

impl LoggingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl fmt::Display for LoggingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match value {
                Value::String(s) => write!(f, "{key}={s}")?,
                other => write!(f, "{key}={other}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_context_preserves_insertion_order() {
        let ctx = LoggingContext::new()
            .with("session_id", "abc")
            .with("user", "alice")
            .with("ssl", false);
        let keys: Vec<_> = ctx.fields().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["session_id", "user", "ssl"]);
    }

    #[test]
    fn test_context_display() {
        let ctx = LoggingContext::new()
            .with("user", "alice")
            .with("ssl", false);
        assert_eq!(ctx.to_string(), "user=alice ssl=false");
    }
}
