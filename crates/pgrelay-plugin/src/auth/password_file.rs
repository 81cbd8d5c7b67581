//! Authenticate against a local `user:password` file.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use pgrelay_core::ConfigMap;
use pgrelay_proto::{AuthMethod, StartupMessage};

use crate::auth::{md5_response, negotiate_target_session, AuthContext, Authenticator};
use crate::error::PluginError;

/// Challenges the client itself and verifies the reply against a file
/// of `user:password` lines, then completes the backend handshake with
/// the verified credentials.
///
/// Options: `path` (required), `method` (`md5` default, or
/// `cleartext`). Blank lines and `#` comments are ignored.
#[derive(Debug)]
pub struct PasswordFileAuth {
    users: HashMap<String, String>,
    method: AuthMethod,
}

impl PasswordFileAuth {
    pub fn from_config(options: &ConfigMap) -> Result<Self, PluginError> {
        let path = options
            .get_str("path")
            .ok_or_else(|| PluginError::Config("password-file requires a path".into()))?;
        let method = match options.get_str_or("method", "md5") {
            "md5" => AuthMethod::Md5Password,
            "cleartext" => AuthMethod::CleartextPassword,
            other => {
                return Err(PluginError::Config(format!(
                    "unsupported password-file method {other:?}"
                )));
            }
        };
        Self::load(Path::new(path), method)
    }

    pub fn load(path: &Path, method: AuthMethod) -> Result<Self, PluginError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            PluginError::Config(format!(
                "cannot read password file {}: {source}",
                path.display()
            ))
        })?;
        Ok(Self {
            users: parse_users(&contents),
            method,
        })
    }

    fn verify(&self, user: &str, stored: &str, offered: &[u8], salt: [u8; 4]) -> bool {
        match self.method {
            AuthMethod::CleartextPassword => offered == stored.as_bytes(),
            AuthMethod::Md5Password => offered == md5_response(user, stored, salt).as_bytes(),
            _ => false,
        }
    }
}

#[async_trait]
impl Authenticator for PasswordFileAuth {
    fn name(&self) -> &'static str {
        "password-file"
    }

    async fn authenticate(
        &self,
        session: &mut dyn AuthContext,
        startup: &StartupMessage,
    ) -> Result<bool, PluginError> {
        // Challenge before looking the user up, so an unknown name is
        // indistinguishable from a wrong password.
        let reply = session.request_password(self.method).await?;
        let user = session.user().to_string();
        let salt = session.salt();
        let Some(stored) = self.users.get(&user) else {
            return Ok(false);
        };
        if !self.verify(&user, stored, reply.password(), salt) {
            return Ok(false);
        }
        negotiate_target_session(session, startup, Some(stored)).await
    }
}

fn parse_users(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (user, password) = line.split_once(':')?;
            Some((user.to_string(), password.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pgrelay_proto::{
        AuthenticationRequest, ClientMessage, PasswordMessage, ServerMessage,
    };
    use tempfile::NamedTempFile;

    use super::*;
    use crate::auth::testing::ScriptedSession;

    fn users_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_users_skips_comments_and_blanks() {
        let users = parse_users("# staff\nalice:swordfish\n\nbob:hunter2\nbroken-line\n");
        assert_eq!(users.len(), 2);
        assert_eq!(users["alice"], "swordfish");
        assert_eq!(users["bob"], "hunter2");
    }

    #[tokio::test]
    async fn test_cleartext_accepts_matching_password() {
        let file = users_file("alice:swordfish\n");
        let auth = PasswordFileAuth::load(file.path(), AuthMethod::CleartextPassword).unwrap();

        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session
            .from_client
            .push_back(ClientMessage::Password(PasswordMessage::cleartext("swordfish")));
        session
            .from_target
            .push_back(ServerMessage::Authentication(AuthenticationRequest::ok()));

        let ok = auth.authenticate(&mut session, &startup).await.unwrap();
        assert!(ok);
        // Challenge first, then the forwarded backend Ok.
        assert_eq!(session.to_client.len(), 2);
        assert!(matches!(session.to_target[0], ClientMessage::Startup(_)));
    }

    #[tokio::test]
    async fn test_cleartext_rejects_wrong_password() {
        let file = users_file("alice:swordfish\n");
        let auth = PasswordFileAuth::load(file.path(), AuthMethod::CleartextPassword).unwrap();

        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        session
            .from_client
            .push_back(ClientMessage::Password(PasswordMessage::cleartext("guess")));

        let ok = auth.authenticate(&mut session, &startup).await.unwrap();
        assert!(!ok);
        // The target was never contacted.
        assert!(session.to_target.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_still_challenged() {
        let file = users_file("alice:swordfish\n");
        let auth = PasswordFileAuth::load(file.path(), AuthMethod::CleartextPassword).unwrap();

        let mut session = ScriptedSession::new("mallory");
        let startup = session.startup();
        session
            .from_client
            .push_back(ClientMessage::Password(PasswordMessage::cleartext("x")));

        let ok = auth.authenticate(&mut session, &startup).await.unwrap();
        assert!(!ok);
        assert_eq!(session.to_client.len(), 1, "challenge must precede the lookup");
    }

    #[tokio::test]
    async fn test_md5_accepts_matching_digest() {
        let file = users_file("alice:swordfish\n");
        let auth = PasswordFileAuth::load(file.path(), AuthMethod::Md5Password).unwrap();

        let mut session = ScriptedSession::new("alice");
        let startup = session.startup();
        let digest = md5_response("alice", "swordfish", session.salt);
        session
            .from_client
            .push_back(ClientMessage::Password(PasswordMessage::cleartext(&digest)));
        session
            .from_target
            .push_back(ServerMessage::Authentication(AuthenticationRequest::ok()));

        let ok = auth.authenticate(&mut session, &startup).await.unwrap();
        assert!(ok);
        assert!(matches!(
            &session.to_client[0],
            ServerMessage::Authentication(r) if r.salt() == Some(session.salt)
        ));
    }

    #[test]
    fn test_from_config_requires_path() {
        let options = ConfigMap::new();
        let err = PasswordFileAuth::from_config(&options).unwrap_err();
        assert!(matches!(err, PluginError::Config(_)));
    }

    #[test]
    fn test_from_config_rejects_unknown_method() {
        let options: ConfigMap =
            serde_yaml::from_str("path: users.txt\nmethod: kerberos\n").unwrap();
        let err = PasswordFileAuth::from_config(&options).unwrap_err();
        assert!(matches!(err, PluginError::Config(_)));
    }
}
