//! Signed identity tokens
//!
//! Stateless bearer credentials: a JWT signed with Ed25519 (`alg = EdDSA`)
//! carrying the user id and plan tier. Claims decode into a typed structure;
//! anything else is rejected rather than coerced.

use crate::auth::{SigningKey, VerifyingKey};
use crate::{Identity, PlanTier, Result, TrailError, UserId};
use jwt_simple::prelude::{
    Claims, Clock, Duration as JwtDuration, EdDSAKeyPairLike, EdDSAPublicKeyLike, JWTClaims,
    VerificationOptions,
};
use jwt_simple::token::Token;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// `iss` claim of every token minted here
pub const TOKEN_ISSUER: &str = "trailgraph";

/// The only accepted header algorithm
pub const TOKEN_ALGORITHM: &str = "EdDSA";

/// Custom claims in an identity token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub user_id: UserId,
    pub tier: PlanTier,
}

/// Verified or freshly minted identity token
#[derive(Debug, Clone)]
pub struct IdentityToken {
    token: String,
    identity: Identity,
    issued_at: Option<u64>,
    expires_at: u64,
}

impl IdentityToken {
    /// Mint a token for `identity`, valid for `validity`
    pub fn create(
        identity: &Identity,
        signing_key: &SigningKey,
        validity: Duration,
    ) -> Result<Self> {
        let custom = IdentityClaims {
            user_id: identity.user_id,
            tier: identity.tier,
        };
        let claims = Claims::with_custom_claims(custom, JwtDuration::from_secs(validity.as_secs()))
            .with_issuer(TOKEN_ISSUER)
            .with_subject(identity.user_id.to_string());

        let issued_at = claims.issued_at.map(|t| t.as_secs());
        let expires_at = claims
            .expires_at
            .map(|t| t.as_secs())
            .ok_or_else(|| TrailError::Internal("token without expiry".to_string()))?;

        let token = sign_claims(signing_key, claims)?;

        Ok(IdentityToken {
            token,
            identity: *identity,
            issued_at,
            expires_at,
        })
    }

    /// Verify a bearer token.
    ///
    /// Rejects a non-EdDSA header, a foreign key id or issuer, a missing or
    /// past expiry, and claims that do not match [`IdentityClaims`]. Every
    /// rejection is `Unauthenticated`.
    pub fn parse(token: &str, verifying_key: &VerifyingKey) -> Result<Self> {
        let metadata = Token::decode_metadata(token).map_err(|_| TrailError::Unauthenticated)?;
        if metadata.algorithm() != TOKEN_ALGORITHM {
            return Err(TrailError::Unauthenticated);
        }

        let options = VerificationOptions {
            allowed_issuers: Some(HashSet::from([TOKEN_ISSUER.to_string()])),
            required_key_id: Some(verifying_key.key_id().as_str().to_string()),
            time_tolerance: Some(JwtDuration::from_secs(0)),
            ..Default::default()
        };

        let claims: JWTClaims<IdentityClaims> = verifying_key
            .public_key()
            .verify_token(token, Some(options))
            .map_err(|_| TrailError::Unauthenticated)?;

        let expires_at = claims
            .expires_at
            .map(|t| t.as_secs())
            .ok_or(TrailError::Unauthenticated)?;
        if expires_at <= Clock::now_since_epoch().as_secs() {
            return Err(TrailError::Unauthenticated);
        }

        Ok(IdentityToken {
            token: token.to_string(),
            identity: Identity::new(claims.custom.user_id, claims.custom.tier),
            issued_at: claims.issued_at.map(|t| t.as_secs()),
            expires_at,
        })
    }

    /// Get the token string
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn issued_at(&self) -> Option<u64> {
        self.issued_at
    }

    /// Expiry as unix seconds
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }
}

fn sign_claims<C>(signing_key: &SigningKey, claims: JWTClaims<C>) -> Result<String>
where
    C: Serialize + serde::de::DeserializeOwned,
{
    signing_key
        .key_pair()
        .sign(claims)
        .map_err(|e| TrailError::Internal(format!("token signing failed: {}", e)))
}
