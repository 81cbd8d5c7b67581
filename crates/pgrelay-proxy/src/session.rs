//! One proxied connection, from accepted startup to torn-down streams.
//!
//! A session owns both peers: `C`, the stream the client arrived on
//! (plain TCP or TLS), and `T`, the connection to the target. Its life
//! is two phases: the handshake, where the configured authenticator
//! drives message IO through the [`AuthContext`] surface, and the relay,
//! where both streams are split and handed to the direction tasks in
//! [`relay`](crate::relay).

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rand::TryRngCore;
use rand::rngs::OsRng;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pgrelay_plugin::{AuthContext, PluginError, PluginRegistry};
use pgrelay_proto::{
    AuthMethod, AuthenticationRequest, ClientMessage, ErrorResponse, Message, PasswordMessage,
    ProtoError, ServerMessage, StartupMessage, write_message,
};

use crate::error::SessionError;
use crate::relay::{
    DirectionEnd, PhaseCell, RelayContext, SessionPhase, read_client_logged, read_server_logged,
    run_request_direction, run_response_direction,
};

/// A single client/target pair being relayed.
pub struct Session<C, T> {
    id: Uuid,
    user: String,
    database: String,
    is_ssl: bool,
    client_addr: Option<SocketAddr>,
    target_addr: Option<SocketAddr>,
    startup: StartupMessage,
    salt: [u8; 4],
    password: Option<Bytes>,
    client: Option<C>,
    target: Option<T>,
    plugins: Arc<PluginRegistry>,
    phase: Arc<PhaseCell>,
}

impl<C, T> Session<C, T>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Build a session around an accepted client and a dialed target.
    /// Draws the session id and MD5 salt from the OS random source.
    pub fn new(
        startup: StartupMessage,
        user: impl Into<String>,
        database: impl Into<String>,
        is_ssl: bool,
        client: C,
        target: T,
        plugins: Arc<PluginRegistry>,
    ) -> Result<Self, SessionError> {
        let id_bytes: [u8; 16] = random_bytes().map_err(SessionError::Identity)?;
        let salt: [u8; 4] = random_bytes().map_err(SessionError::Salt)?;
        Ok(Self {
            id: uuid::Builder::from_random_bytes(id_bytes).into_uuid(),
            user: user.into(),
            database: database.into(),
            is_ssl,
            client_addr: None,
            target_addr: None,
            startup,
            salt,
            password: None,
            client: Some(client),
            target: Some(target),
            plugins,
            phase: Arc::new(PhaseCell::new()),
        })
    }

    /// Attach peer addresses for logging.
    pub fn with_addrs(mut self, client: Option<SocketAddr>, target: Option<SocketAddr>) -> Self {
        self.client_addr = client;
        self.target_addr = target;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_ssl(&self) -> bool {
        self.is_ssl
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    /// Run the session to completion: authenticate, then relay until
    /// one side ends it.
    ///
    /// `Ok(())` covers every orderly outcome, including a rejected
    /// client (which is told so and disconnected) and a clean EOF from
    /// either peer. Errors are protocol violations, mid-frame stream
    /// deaths, and authenticator failures.
    pub async fn handle(&mut self) -> Result<(), SessionError> {
        if self.phase.get() != SessionPhase::Authenticating {
            return Err(SessionError::AlreadyStarted);
        }

        let startup = self.startup.clone();
        let plugins = Arc::clone(&self.plugins);
        let outcome = plugins.authenticate(self, &startup).await;
        // The relay never needs the credential; drop it before the
        // long-lived phase.
        self.password = None;

        match outcome {
            Ok(true) => self.proxy().await,
            Ok(false) => {
                let refusal =
                    ServerMessage::Error(ErrorResponse::fatal("failed to authenticate"));
                // The client may already be gone; the rejection stands
                // either way.
                let _ = self.write_to_client(&refusal).await;
                self.phase.advance(SessionPhase::Stopped);
                Ok(())
            }
            Err(error) => {
                self.phase.advance(SessionPhase::Stopped);
                Err(SessionError::Auth(error))
            }
        }
    }

    /// Split both streams and run the two relay directions until the
    /// first of them ends the session.
    async fn proxy(&mut self) -> Result<(), SessionError> {
        let client = self.client.take().ok_or(SessionError::AlreadyStarted)?;
        let target = self.target.take().ok_or(SessionError::AlreadyStarted)?;
        self.phase.advance(SessionPhase::Proxying);

        let ctx = Arc::new(self.relay_context());
        let stop = CancellationToken::new();
        let (report_tx, mut report_rx) = mpsc::channel::<DirectionEnd>(2);

        let (client_read, client_write) = tokio::io::split(client);
        let (target_read, target_write) = tokio::io::split(target);

        tokio::spawn(run_request_direction(
            client_read,
            target_write,
            Arc::clone(&ctx),
            stop.clone(),
            report_tx.clone(),
        ));
        tokio::spawn(run_response_direction(
            target_read,
            client_write,
            Arc::clone(&ctx),
            stop,
            report_tx,
        ));

        // First report in decides the outcome; the second is the peer
        // being torn down and only matters for completeness.
        let mut outcome = None;
        for _ in 0..2 {
            let Some(end) = report_rx.recv().await else {
                break;
            };
            tracing::debug!(
                session_id = %self.id,
                direction = end.direction.as_str(),
                winner = end.won,
                error = ?end.error,
                "Relay direction finished"
            );
            if end.won {
                outcome = end.error;
            }
        }

        self.phase.advance(SessionPhase::Stopped);
        match outcome {
            Some(error) => Err(SessionError::Proto(error)),
            None => Ok(()),
        }
    }

    /// Shut down the target connection if the session still holds it.
    /// Safe to call more than once; never touches the client stream.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if let Some(mut target) = self.target.take() {
            target.shutdown().await.map_err(ProtoError::Io)?;
        }
        Ok(())
    }

    fn relay_context(&self) -> RelayContext {
        RelayContext {
            session_id: self.id,
            user: self.user.clone(),
            database: self.database.clone(),
            is_ssl: self.is_ssl,
            client_addr: self.client_addr,
            target_addr: self.target_addr,
            plugins: Arc::clone(&self.plugins),
            phase: Arc::clone(&self.phase),
        }
    }
}

/// Diagnostic identity. Never includes credentials.
impl<C, T> fmt::Display for Session<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} user={} database={} ssl={}",
            self.id, self.user, self.database, self.is_ssl
        )
    }
}

#[async_trait]
impl<C, T> AuthContext for Session<C, T>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn user(&self) -> &str {
        &self.user
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn is_ssl(&self) -> bool {
        self.is_ssl
    }

    fn salt(&self) -> [u8; 4] {
        self.salt
    }

    fn password(&self) -> Option<&[u8]> {
        self.password.as_deref()
    }

    async fn request_password(
        &mut self,
        method: AuthMethod,
    ) -> Result<PasswordMessage, PluginError> {
        let request = match method {
            AuthMethod::Md5Password => AuthenticationRequest::md5(self.salt),
            AuthMethod::CleartextPassword => AuthenticationRequest::cleartext(),
            other => AuthenticationRequest {
                method: other,
                payload: Bytes::new(),
            },
        };
        self.write_to_client(&ServerMessage::Authentication(request))
            .await?;
        match AuthContext::read_client_message(self).await? {
            ClientMessage::Password(reply) => {
                self.password = Some(Bytes::copy_from_slice(reply.password()));
                Ok(reply)
            }
            other => Err(PluginError::UnexpectedMessage {
                expected: "PasswordMessage",
                got: other.name(),
            }),
        }
    }

    async fn write_to_client(&mut self, message: &ServerMessage) -> Result<(), PluginError> {
        let stream = self.client.as_mut().ok_or(PluginError::ConnectionClosed)?;
        if let Err(error) = write_message(stream, message).await {
            self.relay_context()
                .log_write_error("target response", &error)
                .await;
            return Err(error.into());
        }
        Ok(())
    }

    async fn write_to_target(&mut self, message: &ClientMessage) -> Result<(), PluginError> {
        let stream = self.target.as_mut().ok_or(PluginError::ConnectionClosed)?;
        if let Err(error) = write_message(stream, message).await {
            self.relay_context()
                .log_write_error("client request", &error)
                .await;
            return Err(error.into());
        }
        Ok(())
    }

    async fn read_client_message(&mut self) -> Result<ClientMessage, PluginError> {
        let ctx = self.relay_context();
        let stream = self.client.as_mut().ok_or(PluginError::ConnectionClosed)?;
        match read_client_logged(stream, &ctx).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(PluginError::ConnectionClosed),
            Err(error) => Err(error.into()),
        }
    }

    async fn read_target_message(&mut self) -> Result<ServerMessage, PluginError> {
        let ctx = self.relay_context();
        let stream = self.target.as_mut().ok_or(PluginError::ConnectionClosed)?;
        match read_server_logged(stream, &ctx).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(PluginError::ConnectionClosed),
            Err(error) => Err(error.into()),
        }
    }
}

/// Fill a fixed-size buffer from the OS random source.
fn random_bytes<const N: usize>() -> Result<[u8; N], String> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|error| error.to_string())?;
    Ok(bytes)
}
