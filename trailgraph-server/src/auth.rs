//! Request authentication
//!
//! Resolves the caller's identity from a session cookie or a bearer token
//! and checks body signatures on ingestion calls.

use hyper::header::{AUTHORIZATION, COOKIE};
use hyper::HeaderMap;
use serde::Serialize;
use trailgraph_core::auth::{verify_body, IdentityToken, SessionToken, VerifyingKey, SIGNATURE_HEADER};
use trailgraph_core::*;
use trailgraph_engine::CredentialStore;

/// Name of the browser session cookie
pub const SESSION_COOKIE: &str = "session";

/// Which credential identified the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthVia {
    Session,
    Bearer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticated {
    pub identity: Identity,
    pub via: AuthVia,
}

/// Credentials found on a request, before any of them is checked
#[derive(Debug, Default)]
pub struct PresentedCredentials {
    pub session: Option<SessionToken>,
    pub bearer: Option<String>,
}

impl PresentedCredentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        PresentedCredentials {
            session: session_cookie(headers),
            bearer: bearer_token(headers),
        }
    }
}

#[derive(Clone)]
pub struct Authenticator {
    credentials: CredentialStore,
    verifying_key: VerifyingKey,
}

impl Authenticator {
    pub fn new(credentials: CredentialStore, verifying_key: VerifyingKey) -> Self {
        Authenticator {
            credentials,
            verifying_key,
        }
    }

    /// Session cookie first, then bearer token.
    ///
    /// Both sources are checked on every call: a missing cookie still costs
    /// a store lookup, and the bearer token is verified even when the
    /// session already matched.
    pub fn authenticate(&self, presented: &PresentedCredentials) -> Result<Authenticated> {
        let lookup = presented
            .session
            .clone()
            .unwrap_or_else(SessionToken::generate);
        let from_session = self.credentials.session(&lookup)?;
        let from_bearer = presented.bearer.as_deref().map(|token| self.verify_bearer(token));

        if let Some(identity) = from_session {
            return Ok(Authenticated {
                identity,
                via: AuthVia::Session,
            });
        }
        from_bearer.unwrap_or(Err(TrailError::Unauthenticated))
    }

    /// Session cookie only
    pub fn authenticate_session(&self, presented: &PresentedCredentials) -> Result<Authenticated> {
        let token = presented.session.as_ref().ok_or(TrailError::Unauthenticated)?;
        let identity = self
            .credentials
            .session(token)?
            .ok_or(TrailError::Unauthenticated)?;
        Ok(Authenticated {
            identity,
            via: AuthVia::Session,
        })
    }

    /// Bearer token only; never touches the store
    pub fn authenticate_bearer(&self, presented: &PresentedCredentials) -> Result<Authenticated> {
        let token = presented.bearer.as_deref().ok_or(TrailError::Unauthenticated)?;
        self.verify_bearer(token)
    }

    fn verify_bearer(&self, token: &str) -> Result<Authenticated> {
        let token = IdentityToken::parse(token, &self.verifying_key)?;
        Ok(Authenticated {
            identity: token.identity(),
            via: AuthVia::Bearer,
        })
    }
}

/// Checks `X-Signature` against the caller's current signing secret
#[derive(Clone)]
pub struct SignatureVerifier {
    credentials: CredentialStore,
}

impl SignatureVerifier {
    pub fn new(credentials: CredentialStore) -> Self {
        SignatureVerifier { credentials }
    }

    pub fn verify(&self, user_id: UserId, body: &[u8], signature: Option<&str>) -> Result<()> {
        let secret = self
            .credentials
            .secret(user_id)?
            .ok_or(TrailError::Unauthenticated)?;
        let signature = signature.ok_or(TrailError::SignatureMismatch)?;
        verify_body(&secret, body, signature)
    }
}

/// Raw `X-Signature` header value
pub fn signature_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn session_cookie(headers: &HeaderMap) -> Option<SessionToken> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| SessionToken::from_string(value))
}

/// `Set-Cookie` value establishing a session
pub fn session_set_cookie(token: &SessionToken, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        token.as_str(),
        max_age_secs
    )
}

/// `Set-Cookie` value expiring the session cookie
pub fn session_clear_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", SESSION_COOKIE)
}
