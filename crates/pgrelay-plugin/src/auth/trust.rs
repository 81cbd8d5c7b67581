//! Accept every client without challenging it.

use async_trait::async_trait;
use pgrelay_core::ConfigMap;
use pgrelay_proto::StartupMessage;

use crate::auth::{negotiate_target_session, AuthContext, Authenticator};
use crate::error::PluginError;

/// Approves any client and completes the backend handshake itself,
/// answering backend challenges from the optional configured password.
///
/// Options: `password` (used when the target challenges; cleartext and
/// MD5 challenges are both answered from it).
pub struct TrustAuth {
    password: Option<String>,
}

impl TrustAuth {
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }

    pub fn from_config(options: &ConfigMap) -> Self {
        Self::new(options.get_str("password").map(String::from))
    }
}

#[async_trait]
impl Authenticator for TrustAuth {
    fn name(&self) -> &'static str {
        "trust"
    }

    async fn authenticate(
        &self,
        session: &mut dyn AuthContext,
        startup: &StartupMessage,
    ) -> Result<bool, PluginError> {
        negotiate_target_session(session, startup, self.password.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use pgrelay_proto::{AuthenticationRequest, ClientMessage, ServerMessage};

    use super::*;
    use crate::auth::md5_response;
    use crate::auth::testing::ScriptedSession;

    #[tokio::test]
    async fn test_trust_forwards_backend_ok() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session
            .from_target
            .push_back(ServerMessage::Authentication(AuthenticationRequest::ok()));

        let ok = TrustAuth::new(None)
            .authenticate(&mut session, &startup)
            .await
            .unwrap();
        assert!(ok);
        // The client never saw a challenge, only the Ok.
        assert_eq!(session.to_client.len(), 1);
        assert!(matches!(
            &session.to_client[0],
            ServerMessage::Authentication(r) if r.is_ok()
        ));
    }

    #[tokio::test]
    async fn test_trust_answers_md5_challenge() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session.from_target.push_back(ServerMessage::Authentication(
            AuthenticationRequest::md5([9, 9, 9, 9]),
        ));
        session
            .from_target
            .push_back(ServerMessage::Authentication(AuthenticationRequest::ok()));

        let ok = TrustAuth::new(Some("secret".into()))
            .authenticate(&mut session, &startup)
            .await
            .unwrap();
        assert!(ok);

        let expected = md5_response("alice", "secret", [9, 9, 9, 9]);
        assert!(matches!(
            &session.to_target[1],
            ClientMessage::Password(p) if p.password() == expected.as_bytes()
        ));
    }

    #[tokio::test]
    async fn test_trust_answers_cleartext_challenge() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session.from_target.push_back(ServerMessage::Authentication(
            AuthenticationRequest::cleartext(),
        ));
        session
            .from_target
            .push_back(ServerMessage::Authentication(AuthenticationRequest::ok()));

        let ok = TrustAuth::new(Some("secret".into()))
            .authenticate(&mut session, &startup)
            .await
            .unwrap();
        assert!(ok);
        assert!(matches!(
            &session.to_target[1],
            ClientMessage::Password(p) if p.password() == b"secret"
        ));
    }

    #[tokio::test]
    async fn test_trust_challenge_without_configured_password() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session.from_target.push_back(ServerMessage::Authentication(
            AuthenticationRequest::cleartext(),
        ));

        let err = TrustAuth::new(None)
            .authenticate(&mut session, &startup)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Config(_)));
    }

    #[tokio::test]
    async fn test_trust_backend_rejection() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session
            .from_target
            .push_back(ServerMessage::Error(pgrelay_proto::ErrorResponse::fatal(
                "nope",
            )));

        let ok = TrustAuth::new(Some("secret".into()))
            .authenticate(&mut session, &startup)
            .await
            .unwrap();
        assert!(!ok);
    }
}
