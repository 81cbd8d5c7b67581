//! Pass authentication through to the target untouched.

use async_trait::async_trait;
use pgrelay_proto::{ClientMessage, Message, ServerMessage, StartupMessage};

use crate::auth::{AuthContext, Authenticator};
use crate::error::PluginError;

/// The default authenticator: relays every authentication round between
/// backend and client verbatim, so the backend stays in charge of
/// credentials. Challenges carry the backend's own salt and mechanism
/// data, which also makes MD5 and SASL work without interpretation.
pub struct PassthroughAuth;

#[async_trait]
impl Authenticator for PassthroughAuth {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn authenticate(
        &self,
        session: &mut dyn AuthContext,
        startup: &StartupMessage,
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
                    session
                        .write_to_client(&ServerMessage::Authentication(request))
                        .await?;
                    let reply = match session.read_client_message().await? {
                        ClientMessage::Password(reply) => reply,
                        other => {
                            return Err(PluginError::UnexpectedMessage {
                                expected: "PasswordMessage",
                                got: other.name(),
                            });
                        }
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
}

#[cfg(test)]
mod tests {
    use pgrelay_proto::{AuthenticationRequest, PasswordMessage, ReadyForQuery};

    use super::*;
    use crate::auth::testing::ScriptedSession;

    #[tokio::test]
    async fn test_passthrough_relays_challenge_rounds() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session
            .from_target
            .push_back(ServerMessage::Authentication(AuthenticationRequest::md5([9, 9, 9, 9])));
        session
            .from_target
            .push_back(ServerMessage::Authentication(AuthenticationRequest::ok()));
        session
            .from_client
            .push_back(ClientMessage::Password(PasswordMessage::cleartext("md5abc")));

        let ok = PassthroughAuth
            .authenticate(&mut session, &startup)
            .await
            .unwrap();
        assert!(ok);

        // Challenge and final Ok both reached the client, verbatim.
        assert_eq!(session.to_client.len(), 2);
        assert!(matches!(
            &session.to_client[0],
            ServerMessage::Authentication(r) if r.salt() == Some([9, 9, 9, 9])
        ));
        assert!(matches!(
            &session.to_client[1],
            ServerMessage::Authentication(r) if r.is_ok()
        ));
        // Startup then the relayed password reached the target.
        assert_eq!(session.to_target.len(), 2);
        assert!(matches!(session.to_target[0], ClientMessage::Startup(_)));
        assert!(matches!(session.to_target[1], ClientMessage::Password(_)));
    }

    #[tokio::test]
    async fn test_passthrough_backend_without_challenge() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session
            .from_target
            .push_back(ServerMessage::Authentication(AuthenticationRequest::ok()));

        let ok = PassthroughAuth
            .authenticate(&mut session, &startup)
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(session.to_client.len(), 1);
    }

    #[tokio::test]
    async fn test_passthrough_backend_rejection() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session
            .from_target
            .push_back(ServerMessage::Error(pgrelay_proto::ErrorResponse::fatal(
                "no such role",
            )));

        let ok = PassthroughAuth
            .authenticate(&mut session, &startup)
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_passthrough_unexpected_backend_message() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session
            .from_target
            .push_back(ServerMessage::ReadyForQuery(ReadyForQuery::idle()));

        let err = PassthroughAuth
            .authenticate(&mut session, &startup)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PluginError::UnexpectedMessage { expected: "AuthenticationRequest", .. }
        ));
    }

    #[tokio::test]
    async fn test_passthrough_non_password_client_reply() {
        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session
            .from_target
            .push_back(ServerMessage::Authentication(AuthenticationRequest::cleartext()));
        session.from_client.push_back(ClientMessage::Terminate);

        let err = PassthroughAuth
            .authenticate(&mut session, &startup)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PluginError::UnexpectedMessage { expected: "PasswordMessage", got: "Terminate" }
        ));
    }
}
