//! Per-listener plugin registry.

use std::collections::HashMap;
use std::fmt;

use pgrelay_core::ConfigMap;
use pgrelay_proto::StartupMessage;

use crate::auth::{AuthContext, Authenticator, PassthroughAuth, PasswordFileAuth, TrustAuth};
use crate::context::{LogLevel, LoggingContext};
use crate::error::PluginError;
use crate::logging::{ConsoleLogger, FileLogger, LoggingPlugin};

/// The capabilities injected into every session: one authenticator and
/// any number of logging sinks. Built once per listener and shared.
pub struct PluginRegistry {
    authenticator: Box<dyn Authenticator>,
    loggers: Vec<Box<dyn LoggingPlugin>>,
}

impl PluginRegistry {
    pub fn new(
        authenticator: Box<dyn Authenticator>,
        loggers: Vec<Box<dyn LoggingPlugin>>,
    ) -> Self {
        Self {
            authenticator,
            loggers,
        }
    }

    /// Build from the configuration maps. An empty authentication
    /// section selects passthrough; logging plugins are instantiated in
    /// name order.
    pub fn from_config(
        authentication: &HashMap<String, ConfigMap>,
        logging: &HashMap<String, ConfigMap>,
    ) -> Result<Self, PluginError> {
        let authenticator = match authentication.len() {
            0 => Box::new(PassthroughAuth) as Box<dyn Authenticator>,
            1 => {
                let (name, options) = authentication
                    .iter()
                    .next()
                    .ok_or_else(|| PluginError::Config("empty authentication entry".into()))?;
                build_authenticator(name, options)?
            }
            _ => {
                return Err(PluginError::Config(
                    "more than one authentication plugin configured".into(),
                ));
            }
        };

        let mut names: Vec<&String> = logging.keys().collect();
        names.sort();
        let mut loggers = Vec::with_capacity(names.len());
        for name in names {
            loggers.push(build_logger(name, &logging[name])?);
        }
        Ok(Self::new(authenticator, loggers))
    }

    pub fn authenticator_name(&self) -> &'static str {
        self.authenticator.name()
    }

    pub async fn authenticate(
        &self,
        session: &mut dyn AuthContext,
        startup: &StartupMessage,
    ) -> Result<bool, PluginError> {
        self.authenticator.authenticate(session, startup).await
    }

    pub async fn log_debug(&self, context: &LoggingContext, message: &str) {
        self.dispatch(LogLevel::Debug, context, message).await;
    }

    pub async fn log_info(&self, context: &LoggingContext, message: &str) {
        self.dispatch(LogLevel::Info, context, message).await;
    }

    pub async fn log_warn(&self, context: &LoggingContext, message: &str) {
        self.dispatch(LogLevel::Warn, context, message).await;
    }

    pub async fn log_error(&self, context: &LoggingContext, message: &str) {
        self.dispatch(LogLevel::Error, context, message).await;
    }

    async fn dispatch(&self, level: LogLevel, context: &LoggingContext, message: &str) {
        for plugin in &self.loggers {
            if let Err(error) = plugin.log(level, context, message).await {
                tracing::warn!(plugin = plugin.name(), %error, "Logging plugin failed");
            }
        }
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("authenticator", &self.authenticator.name())
            .field(
                "loggers",
                &self.loggers.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Instantiate a named authentication plugin.
pub fn build_authenticator(
    name: &str,
    options: &ConfigMap,
) -> Result<Box<dyn Authenticator>, PluginError> {
    match name {
        "passthrough" => Ok(Box::new(PassthroughAuth)),
        "trust" => Ok(Box::new(TrustAuth::from_config(options))),
        "password-file" => Ok(Box::new(PasswordFileAuth::from_config(options)?)),
        other => Err(PluginError::Config(format!(
            "unknown authentication plugin {other:?}"
        ))),
    }
}

/// Instantiate a named logging plugin.
pub fn build_logger(
    name: &str,
    options: &ConfigMap,
) -> Result<Box<dyn LoggingPlugin>, PluginError> {
    match name {
        "console" => Ok(Box::new(ConsoleLogger::from_config(options)?)),
        "file" => Ok(Box::new(FileLogger::from_config(options)?)),
        other => Err(PluginError::Config(format!(
            "unknown logging plugin {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    #[test]
    fn test_empty_authentication_selects_passthrough() {
        let registry = PluginRegistry::from_config(&HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(registry.authenticator_name(), "passthrough");
    }

    #[test]
    fn test_unknown_authenticator_rejected() {
        let mut authentication = HashMap::new();
        authentication.insert("kerberos".to_string(), ConfigMap::new());
        let err = PluginRegistry::from_config(&authentication, &HashMap::new()).unwrap_err();
        assert!(matches!(err, PluginError::Config(_)));
    }

    #[test]
    fn test_two_authenticators_rejected() {
        let mut authentication = HashMap::new();
        authentication.insert("trust".to_string(), ConfigMap::new());
        authentication.insert("passthrough".to_string(), ConfigMap::new());
        let err = PluginRegistry::from_config(&authentication, &HashMap::new()).unwrap_err();
        assert!(matches!(err, PluginError::Config(_)));
    }

    #[test]
    fn test_unknown_logger_rejected() {
        let mut logging = HashMap::new();
        logging.insert("syslog".to_string(), ConfigMap::new());
        let err = PluginRegistry::from_config(&HashMap::new(), &logging).unwrap_err();
        assert!(matches!(err, PluginError::Config(_)));
    }

    struct FailingLogger;

    #[async_trait]
    impl LoggingPlugin for FailingLogger {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn log(
            &self,
            _level: LogLevel,
            _context: &LoggingContext,
            _message: &str,
        ) -> Result<(), PluginError> {
            Err(PluginError::Config("broken".into()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_swallows_plugin_failures() {
        let registry = PluginRegistry::new(Box::new(PassthroughAuth), vec![Box::new(FailingLogger)]);
        let ctx = LoggingContext::new().with("user", "alice");
        // Must not propagate or panic.
        registry.log_error(&ctx, "something happened").await;
    }
}
