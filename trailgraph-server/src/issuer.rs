//! Issues the (identity token, signing secret) pair handed out at login

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use trailgraph_core::auth::{IdentityToken, SessionToken, SigningKey, SigningSecret};
use trailgraph_core::*;
use trailgraph_engine::CredentialStore;

/// Credentials returned to a client after login
#[derive(Debug)]
pub struct IssuedCredentials {
    pub token: IdentityToken,
    pub signing_secret: SigningSecret,
}

/// Writes the issuer needs from the credential store
pub trait CredentialSink: Send + Sync {
    fn put_secret(&self, user_id: UserId, secret: &SigningSecret, ttl: Duration) -> Result<()>;

    fn delete_secret(&self, user_id: UserId) -> Result<()>;

    fn put_session(&self, token: &SessionToken, identity: &Identity, ttl: Duration)
        -> Result<()>;
}

impl CredentialSink for CredentialStore {
    fn put_secret(&self, user_id: UserId, secret: &SigningSecret, ttl: Duration) -> Result<()> {
        CredentialStore::put_secret(self, user_id, secret, ttl)
    }

    fn delete_secret(&self, user_id: UserId) -> Result<()> {
        CredentialStore::delete_secret(self, user_id)
    }

    fn put_session(
        &self,
        token: &SessionToken,
        identity: &Identity,
        ttl: Duration,
    ) -> Result<()> {
        CredentialStore::put_session(self, token, identity, ttl)
    }
}

pub struct TokenIssuer {
    signing_key: SigningKey,
    credentials: Arc<dyn CredentialSink>,
    validity: Duration,
}

impl TokenIssuer {
    pub fn new(
        signing_key: SigningKey,
        credentials: impl CredentialSink + 'static,
        validity: Duration,
    ) -> Self {
        TokenIssuer {
            signing_key,
            credentials: Arc::new(credentials),
            validity,
        }
    }

    /// Mint a token and a fresh signing secret for `identity`.
    ///
    /// The secret replaces any previous one and lives exactly as long as
    /// the token. If it cannot be stored the token is discarded.
    pub fn issue(&self, identity: &Identity) -> Result<IssuedCredentials> {
        let token = IdentityToken::create(identity, &self.signing_key, self.validity)?;
        let signing_secret = SigningSecret::generate();

        self.credentials
            .put_secret(identity.user_id, &signing_secret, self.validity)?;

        debug!(user_id = %identity.user_id, expires_at = token.expires_at(), "issued credentials");
        Ok(IssuedCredentials {
            token,
            signing_secret,
        })
    }

    /// Everything a successful login hands out: a browser session plus the
    /// extension's token and secret. Either all of it is stored or none.
    pub fn login(
        &self,
        identity: &Identity,
        session_ttl: Duration,
    ) -> Result<(SessionToken, IssuedCredentials)> {
        let issued = self.issue(identity)?;

        let session = SessionToken::generate();
        if let Err(e) = self.credentials.put_session(&session, identity, session_ttl) {
            if let Err(cleanup) = self.credentials.delete_secret(identity.user_id) {
                warn!(user_id = %identity.user_id, error = %cleanup, "could not withdraw signing secret");
            }
            return Err(e);
        }

        Ok((session, issued))
    }
}
