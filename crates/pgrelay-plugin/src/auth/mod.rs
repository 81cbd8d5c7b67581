//! Authentication plugin seam.
//!
//! An [`Authenticator`] decides whether a connecting client may have a
//! session. It drives the handshake through an [`AuthContext`], the
//! narrow surface a session exposes: identity accessors, a
//! challenge/response helper, and raw message IO toward either peer.
//!
//! Outcomes are three-valued: `Ok(true)` authenticated, `Ok(false)`
//! rejected credentials (the session turns this into a fatal notice for
//! the client), `Err` an infrastructure or protocol failure.

mod passthrough;
mod password_file;
mod trust;

pub use passthrough::PassthroughAuth;
pub use password_file::PasswordFileAuth;
pub use trust::TrustAuth;

use async_trait::async_trait;
use pgrelay_proto::{
    AuthMethod, ClientMessage, Message, PasswordMessage, ProtoError, ServerMessage,
    StartupMessage,
};

use crate::error::PluginError;

/// The session surface an authenticator works against.
#[async_trait]
pub trait AuthContext: Send {
    fn user(&self) -> &str;

    fn database(&self) -> &str;

    fn is_ssl(&self) -> bool;

    /// Per-session random salt used when this side issues an MD5
    /// challenge.
    fn salt(&self) -> [u8; 4];

    /// The most recent credential received from the client, if any.
    fn password(&self) -> Option<&[u8]>;

    /// Challenge the client: write an authentication request for
    /// `method` (carrying the session salt for MD5) and read the reply,
    /// which must be a password message.
    async fn request_password(
        &mut self,
        method: AuthMethod,
    ) -> Result<PasswordMessage, PluginError>;

    async fn write_to_client(&mut self, message: &ServerMessage) -> Result<(), PluginError>;

    async fn write_to_target(&mut self, message: &ClientMessage) -> Result<(), PluginError>;

    /// Read the next client message. The handshake cannot outlive the
    /// client, so EOF here is [`PluginError::ConnectionClosed`].
    async fn read_client_message(&mut self) -> Result<ClientMessage, PluginError>;

    async fn read_target_message(&mut self) -> Result<ServerMessage, PluginError>;
}

/// Decides whether a session may proceed to the relay loop.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Plugin name as used in the configuration file.
    fn name(&self) -> &'static str;

    async fn authenticate(
        &self,
        session: &mut dyn AuthContext,
        startup: &StartupMessage,
    ) -> Result<bool, PluginError>;
}

/// Compute the response to an MD5 challenge:
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
pub fn md5_response(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut digest = format!("{:x}", md5::compute(format!("{password}{user}"))).into_bytes();
    digest.extend_from_slice(&salt);
    format!("md5{:x}", md5::compute(digest))
}

/// Complete the backend side of the handshake for a client that has
/// already been approved: forward the startup, answer challenges from
/// `password`, and forward the final Ok to the client. A backend error
/// during the exchange is a rejection, not a failure.
pub(crate) async fn negotiate_target_session(
    session: &mut dyn AuthContext,
    startup: &StartupMessage,
    password: Option<&str>,
) -> Result<bool, PluginError> {
    session
        .write_to_target(&ClientMessage::Startup(startup.clone()))
        .await?;
    loop {
        match session.read_target_message().await? {
            ServerMessage::Authentication(request) if request.is_ok() => {
                session
                    .write_to_client(&ServerMessage::Authentication(request))
                    .await?;
                return Ok(true);
            }
            ServerMessage::Authentication(request) => {
                let password = password.ok_or_else(|| {
                    PluginError::Config(
                        "target requested credentials but none are configured".into(),
                    )
                })?;
                let reply = match request.method {
                    AuthMethod::CleartextPassword => PasswordMessage::cleartext(password),
                    AuthMethod::Md5Password => {
                        let salt = request.salt().ok_or_else(|| {
                            ProtoError::Malformed("md5 challenge without salt".into())
                        })?;
                        PasswordMessage::cleartext(&md5_response(session.user(), password, salt))
                    }
                    method => return Err(PluginError::UnsupportedMethod(method)),
                };
                session
                    .write_to_target(&ClientMessage::Password(reply))
                    .await?;
            }
            ServerMessage::Error(_) => return Ok(false),
            other => {
                return Err(PluginError::UnexpectedMessage {
                    expected: "AuthenticationRequest",
                    got: other.name(),
                });
            }
        }
    }
}
