//! # pgrelay-core
//!
//! Configuration model for the pgrelay gateway: the strict YAML file
//! layout, per-listener settings, and the free-form option maps handed
//! to plugin factories.

pub mod config;
pub mod error;

pub use config::{Config, ConfigMap, ListenerConfig, SslConfig, TargetConfig};
pub use error::ConfigError;
