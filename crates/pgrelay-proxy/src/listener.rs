//! One listening socket: accepts clients, negotiates SSL, validates the
//! startup, dials the target, and hands the pair to a [`Session`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pgrelay_core::{ConfigError, ConfigMap, ListenerConfig};
use pgrelay_plugin::PluginRegistry;
use pgrelay_proto::{
    ClientMessage, ErrorResponse, Message, ProtoError, ServerMessage, StartupMessage,
    read_client_message, write_message,
};
use tokio_rustls::TlsAcceptor;

use crate::error::ProxyError;
use crate::session::Session;
use crate::tls;

/// A configured listener, ready to accept connections.
pub struct Listener {
    config: ListenerConfig,
    plugins: Arc<PluginRegistry>,
    tls: Option<TlsAcceptor>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("config", &self.config)
            .field("plugins", &self.plugins)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl Listener {
    /// Build the listener's plugin registry and TLS acceptor up front,
    /// so configuration mistakes surface before the first connection.
    ///
    /// `logging` is the merged logging plugin map for this listener.
    pub fn new(
        config: ListenerConfig,
        logging: &HashMap<String, ConfigMap>,
    ) -> Result<Self, ProxyError> {
        let plugins = Arc::new(PluginRegistry::from_config(&config.authentication, logging)?);
        let tls = if config.ssl.enabled {
            let certificate = config.ssl.certificate.as_deref().ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "listener {}: ssl enabled without certificate and key",
                    config.bind
                ))
            })?;
            let key = config.ssl.key.as_deref().ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "listener {}: ssl enabled without certificate and key",
                    config.bind
                ))
            })?;
            Some(tls::build_acceptor(certificate, key)?)
        } else {
            None
        };
        Ok(Self {
            config,
            plugins,
            tls,
        })
    }

    pub fn bind_address(&self) -> &str {
        &self.config.bind
    }

    pub fn authenticator_name(&self) -> &'static str {
        self.plugins.authenticator_name()
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(self) -> Result<(), ProxyError> {
        let socket = TcpListener::bind(&self.config.bind)
            .await
            .map_err(|source| ProxyError::Bind {
                address: self.config.bind.clone(),
                source,
            })?;
        self.serve(socket).await
    }

    /// Serve connections from an already-bound socket.
    pub async fn serve(self, socket: TcpListener) -> Result<(), ProxyError> {
        tracing::info!(
            bind = %self.config.bind,
            target = %self.config.target.address(),
            authentication = self.plugins.authenticator_name(),
            ssl = self.tls.is_some(),
            "Listener started"
        );
        let listener = Arc::new(self);
        loop {
            let (stream, peer) = match socket.accept().await {
                Ok(conn) => conn,
                Err(error) => {
                    tracing::error!(error = %error, "Failed to accept connection");
                    continue;
                }
            };
            tracing::debug!(client = %peer, "New connection");
            let listener = Arc::clone(&listener);
            tokio::spawn(async move {
                if let Err(error) = listener.serve_connection(stream, peer).await {
                    tracing::error!(client = %peer, error = %error, "Connection failed");
                }
            });
        }
    }

    /// Drive one accepted connection through SSL negotiation and the
    /// startup exchange, then run the session.
    // TODO: recognize CancelRequest here and forward it to the target
    // instead of failing the connection with UnsupportedStartup.
    async fn serve_connection(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), ProxyError> {
        let first = match read_client_message(&mut stream).await? {
            Some(ClientMessage::Startup(startup)) => startup,
            Some(other) => {
                return Err(ProxyError::UnexpectedStartup { got: other.name() });
            }
            // Port scanners and health checks connect and leave.
            None => return Ok(()),
        };

        if !first.ssl_request {
            return self.run_session(stream, peer, first, false).await;
        }

        match &self.tls {
            Some(acceptor) => {
                stream.write_all(b"S").await.map_err(ProtoError::Io)?;
                let mut tls_stream = acceptor.accept(stream).await.map_err(ProtoError::Io)?;
                match read_startup(&mut tls_stream).await? {
                    Some(startup) => self.run_session(tls_stream, peer, startup, true).await,
                    None => Ok(()),
                }
            }
            None => {
                stream.write_all(b"N").await.map_err(ProtoError::Io)?;
                match read_startup(&mut stream).await? {
                    Some(startup) => self.run_session(stream, peer, startup, false).await,
                    // The client wanted SSL or nothing.
                    None => Ok(()),
                }
            }
        }
    }

    async fn run_session<C>(
        &self,
        mut client: C,
        peer: SocketAddr,
        startup: StartupMessage,
        is_ssl: bool,
    ) -> Result<(), ProxyError>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.config.ssl.required && !is_ssl {
            let refusal = ServerMessage::Error(ErrorResponse::fatal(
                "this listener only accepts ssl connections",
            ));
            let _ = write_message(&mut client, &refusal).await;
            return Err(ProxyError::SslRequired);
        }

        let (user, database) = match required_options(&startup) {
            Ok(pair) => pair,
            Err(error) => {
                let refusal = ServerMessage::Error(ErrorResponse::fatal(&error.to_string()));
                let _ = write_message(&mut client, &refusal).await;
                return Err(error);
            }
        };

        let target_address = self.config.target.address();
        let target = TcpStream::connect(&target_address).await.map_err(|source| {
            ProxyError::TargetConnect {
                address: target_address.clone(),
                source,
            }
        })?;
        let target_addr = target.peer_addr().ok();

        let mut session = Session::new(
            startup,
            user,
            database,
            is_ssl,
            client,
            target,
            Arc::clone(&self.plugins),
        )?
        .with_addrs(Some(peer), target_addr);

        tracing::info!(
            session_id = %session.id(),
            user = session.user(),
            database = session.database(),
            ssl = is_ssl,
            client = %peer,
            target = %target_address,
            "Session started"
        );
        let result = session.handle().await;
        if let Err(error) = session.close().await {
            tracing::debug!(
                session_id = %session.id(),
                error = %error,
                "Error closing target connection"
            );
        }
        tracing::info!(session_id = %session.id(), "Session ended");
        result?;
        Ok(())
    }
}

/// Read the regular startup that must follow SSL negotiation. `None`
/// means the client left; a second SSLRequest is a protocol violation.
async fn read_startup<C>(stream: &mut C) -> Result<Option<StartupMessage>, ProxyError>
where
    C: AsyncRead + Unpin,
{
    match read_client_message(stream).await? {
        Some(ClientMessage::Startup(startup)) if !startup.ssl_request => Ok(Some(startup)),
        Some(ClientMessage::Startup(_)) => Err(ProxyError::UnexpectedStartup {
            got: "SSLRequest",
        }),
        Some(other) => Err(ProxyError::UnexpectedStartup { got: other.name() }),
        None => Ok(None),
    }
}

/// The startup options the proxy itself needs before dialing the
/// target.
fn required_options(startup: &StartupMessage) -> Result<(String, String), ProxyError> {
    let user = startup
        .user()
        .ok_or(ProxyError::MissingStartupOption { option: "user" })?;
    let database = startup
        .database()
        .ok_or(ProxyError::MissingStartupOption { option: "database" })?;
    Ok((user.to_string(), database.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn startup_with(options: Vec<(String, String)>) -> StartupMessage {
        StartupMessage::new(options)
    }

    #[test]
    fn test_required_options_present() {
        let startup = startup_with(vec![
            ("user".into(), "alice".into()),
            ("database".into(), "app".into()),
        ]);
        let (user, database) = required_options(&startup).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(database, "app");
    }

    #[test]
    fn test_required_options_missing_user() {
        let startup = startup_with(vec![("database".into(), "app".into())]);
        let err = required_options(&startup).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::MissingStartupOption { option: "user" }
        ));
    }

    #[test]
    fn test_required_options_missing_database() {
        let startup = startup_with(vec![("user".into(), "alice".into())]);
        let err = required_options(&startup).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::MissingStartupOption { option: "database" }
        ));
    }

    #[test]
    fn test_new_rejects_ssl_without_cert_paths() {
        let config = ListenerConfig {
            bind: "127.0.0.1:5433".into(),
            ssl: pgrelay_core::SslConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = Listener::new(config, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn test_new_rejects_unknown_auth_plugin() {
        let mut authentication = HashMap::new();
        authentication.insert("kerberos".to_string(), ConfigMap::new());
        let config = ListenerConfig {
            bind: "127.0.0.1:5433".into(),
            authentication,
            ..Default::default()
        };
        let err = Listener::new(config, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ProxyError::Plugin(_)));
    }

    #[test]
    fn test_new_defaults_to_passthrough() {
        let config = ListenerConfig {
            bind: "127.0.0.1:5433".into(),
            ..Default::default()
        };
        let listener = Listener::new(config, &HashMap::new()).unwrap();
        assert_eq!(listener.authenticator_name(), "passthrough");
        assert_eq!(listener.bind_address(), "127.0.0.1:5433");
    }
}
