//! Gateway configuration types.
//!
//! The file is YAML, parsed strictly: unknown keys are rejected so a
//! typo never silently disables a setting. Listeners are keyed by bind
//! address; plugin sections are free-form name/options maps consumed by
//! the plugin factories through [`ConfigMap`].
//!
//! ```yaml
//! procs: 4
//! logging:
//!   console:
//!     level: info
//! listeners:
//!   "0.0.0.0:5433":
//!     ssl:
//!       enabled: true
//!       certificate: certs/server.crt
//!       key: certs/server.key
//!     target:
//!       host: db.internal
//!       port: 5432
//!     authentication:
//!       passthrough: {}
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Worker thread count for the runtime. Defaults to the number of
    /// CPUs when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procs: Option<usize>,

    /// Logging plugins applied to every listener (name -> options).
    #[serde(default)]
    pub logging: HashMap<String, ConfigMap>,

    /// Listeners keyed by bind address.
    #[serde(default)]
    pub listeners: HashMap<String, ListenerConfig>,
}

impl Config {
    /// Parse, resolve, and validate a YAML configuration.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(input)?;
        config.resolve();
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&input)
    }

    /// Effective logging plugins for one listener: listener entries
    /// override same-named global entries.
    pub fn logging_for(&self, listener: &ListenerConfig) -> HashMap<String, ConfigMap> {
        let mut merged = self.logging.clone();
        for (name, options) in &listener.logging {
            merged.insert(name.clone(), options.clone());
        }
        merged
    }

    /// Copy each listener's map key into its `bind` field.
    fn resolve(&mut self) {
        for (bind, listener) in &mut self.listeners {
            listener.bind = bind.clone();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.listeners.is_empty() {
            return Err(ConfigError::Invalid("no listeners configured".into()));
        }
        for listener in self.listeners.values() {
            listener.validate()?;
        }
        Ok(())
    }
}

/// One listening socket and everything scoped to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Bind address, filled in from the listener's key under
    /// `listeners` during parsing.
    #[serde(skip)]
    pub bind: String,

    /// SSL negotiation settings for connecting clients.
    #[serde(default)]
    pub ssl: SslConfig,

    /// The backend this listener forwards to.
    #[serde(default)]
    pub target: TargetConfig,

    /// Authentication plugin. At most one entry; an empty map selects
    /// passthrough.
    #[serde(default)]
    pub authentication: HashMap<String, ConfigMap>,

    /// Listener-level logging plugins, merged over the global set.
    #[serde(default)]
    pub logging: HashMap<String, ConfigMap>,
}

impl ListenerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ssl.enabled && (self.ssl.certificate.is_none() || self.ssl.key.is_none()) {
            return Err(ConfigError::Invalid(format!(
                "listener {}: ssl enabled without certificate and key",
                self.bind
            )));
        }
        if self.ssl.required && !self.ssl.enabled {
            return Err(ConfigError::Invalid(format!(
                "listener {}: ssl required but not enabled",
                self.bind
            )));
        }
        if self.authentication.len() > 1 {
            return Err(ConfigError::Invalid(format!(
                "listener {}: more than one authentication plugin",
                self.bind
            )));
        }
        if self.target.host.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "listener {}: target host is empty",
                self.bind
            )));
        }
        if self.target.port == 0 {
            return Err(ConfigError::Invalid(format!(
                "listener {}: target port is zero",
                self.bind
            )));
        }
        Ok(())
    }
}

/// SSL negotiation settings for a listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SslConfig {
    /// Whether SSLRequest negotiation is answered with `S`.
    #[serde(default)]
    pub enabled: bool,

    /// Reject clients that do not negotiate SSL.
    #[serde(default)]
    pub required: bool,

    /// Path to the PEM certificate chain.
    #[serde(default)]
    pub certificate: Option<PathBuf>,

    /// Path to the PEM private key.
    #[serde(default)]
    pub key: Option<PathBuf>,
}

/// The backend a listener forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Backend hostname.
    #[serde(default = "default_target_host")]
    pub host: String,

    /// Backend port.
    #[serde(default = "default_target_port")]
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_target_host(),
            port: default_target_port(),
        }
    }
}

impl TargetConfig {
    /// `host:port` form for dialing.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Free-form plugin options with typed accessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigMap(HashMap<String, serde_yaml::Value>);

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.as_str()
    }

    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key)?.as_bool()
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key)?.as_u64()
    }

    pub fn get_u64_or(&self, key: &str, default: u64) -> u64 {
        self.get_u64(key).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Default value functions
fn default_target_host() -> String {
    "localhost".to_string()
}

fn default_target_port() -> u16 {
    5432
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
procs: 2
logging:
  console:
    level: debug
listeners:
  "127.0.0.1:5433":
    ssl:
      enabled: true
      required: false
      certificate: certs/server.crt
      key: certs/server.key
    target:
      host: db.internal
      port: 6432
    authentication:
      password-file:
        path: users.txt
        method: md5
    logging:
      file:
        path: relay.log
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();
        assert_eq!(config.procs, Some(2));
        let listener = &config.listeners["127.0.0.1:5433"];
        assert_eq!(listener.bind, "127.0.0.1:5433");
        assert!(listener.ssl.enabled);
        assert_eq!(listener.target.host, "db.internal");
        assert_eq!(listener.target.address(), "db.internal:6432");
        let auth = &listener.authentication["password-file"];
        assert_eq!(auth.get_str("path"), Some("users.txt"));
        assert_eq!(auth.get_str_or("method", "md5"), "md5");
    }

    #[test]
    fn test_target_defaults() {
        let config = Config::parse("listeners:\n  \"0.0.0.0:5433\": {}\n").unwrap();
        let listener = &config.listeners["0.0.0.0:5433"];
        assert_eq!(listener.target.host, "localhost");
        assert_eq!(listener.target.port, 5432);
        assert!(listener.authentication.is_empty());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::parse("listeners: {}\nprcs: 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_no_listeners_rejected() {
        let err = Config::parse("procs: 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_ssl_without_cert_rejected() {
        let input = r#"
listeners:
  "0.0.0.0:5433":
    ssl:
      enabled: true
"#;
        let err = Config::parse(input).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_ssl_required_without_enabled_rejected() {
        let input = r#"
listeners:
  "0.0.0.0:5433":
    ssl:
      required: true
"#;
        let err = Config::parse(input).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_two_authenticators_rejected() {
        let input = r#"
listeners:
  "0.0.0.0:5433":
    authentication:
      trust: {}
      passthrough: {}
"#;
        let err = Config::parse(input).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_logging_merge_listener_overrides_global() {
        let input = r#"
logging:
  console:
    level: info
  file:
    path: global.log
listeners:
  "0.0.0.0:5433":
    logging:
      file:
        path: listener.log
"#;
        let config = Config::parse(input).unwrap();
        let listener = &config.listeners["0.0.0.0:5433"];
        let merged = config.logging_for(listener);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["file"].get_str("path"), Some("listener.log"));
        assert_eq!(merged["console"].get_str("level"), Some("info"));
    }

    #[test]
    fn test_config_map_typed_accessors() {
        let map: ConfigMap = serde_yaml::from_str("a: true\nb: 42\nc: text\n").unwrap();
        assert_eq!(map.get_bool("a"), Some(true));
        assert!(!map.get_bool_or("missing", false));
        assert_eq!(map.get_u64("b"), Some(42));
        assert_eq!(map.get_u64_or("missing", 7), 7);
        assert_eq!(map.get_str("c"), Some("text"));
        assert!(!map.is_empty());
    }
}
