//! JWT access token issuance/verification and opaque refresh token
//! generation.
//!
//! A [`TokenService`] is immutable once built. Verification reads only
//! its own fields, so one instance can be shared across every request
//! task without locking. Key rotation produces a new instance that
//! signs with the new key and still accepts the old one for a bounded
//! grace period.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use keel_core::clock::Clock;
use keel_core::models::user::{Role, User};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};

/// JWT claims embedded in every access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject: user ID as a UUID string.
    pub sub: String,
    pub role: Role,
    /// Issuer.
    pub iss: String,
    /// Issued-at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Unique token ID (UUID string).
    pub jti: String,
}

impl AccessTokenClaims {
    pub fn user_id(&self) -> AuthResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|e| AuthError::MalformedToken(format!("sub: {e}")))
    }
}

/// A freshly signed access token and the claims inside it.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub claims: AccessTokenClaims,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
struct VerifyingKey {
    kid: String,
    key: DecodingKey,
    /// `None` for the active key.
    retired_at: Option<DateTime<Utc>>,
}

pub struct TokenService {
    clock: Arc<dyn Clock>,
    issuer: String,
    lifetime: Duration,
    skew: Duration,
    grace: Duration,
    signing_kid: String,
    signing_key: EncodingKey,
    current: VerifyingKey,
    previous: Option<VerifyingKey>,
    validation: Validation,
}

impl TokenService {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        let signing_key = EncodingKey::from_ed_pem(config.jwt_private_key_pem.as_bytes())
            .map_err(|e| AuthError::Crypto(format!("bad private key: {e}")))?;
        let current = VerifyingKey {
            kid: config.jwt_key_id.clone(),
            key: decoding_key(&config.jwt_public_key_pem)?,
            retired_at: None,
        };

        let previous = match (
            &config.previous_jwt_public_key_pem,
            &config.previous_jwt_key_id,
        ) {
            (Some(pem), Some(kid)) => Some(VerifyingKey {
                kid: kid.clone(),
                key: decoding_key(pem)?,
                retired_at: Some(config.previous_key_retired_at.unwrap_or_else(|| clock.now())),
            }),
            (None, None) => None,
            _ => {
                return Err(AuthError::Crypto(
                    "previous key needs both a public key and a key id".into(),
                ));
            }
        };

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_issuer(&[&config.jwt_issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "iat", "iss"]);
        // Expiry is checked against the injected clock, not the OS clock.
        validation.validate_exp = false;

        Ok(Self {
            clock,
            issuer: config.jwt_issuer.clone(),
            lifetime: Duration::seconds(config.access_token_lifetime_secs as i64),
            skew: Duration::seconds(config.clock_skew_secs as i64),
            grace: Duration::seconds(config.key_grace_period_secs as i64),
            signing_kid: config.jwt_key_id.clone(),
            signing_key,
            current,
            previous,
            validation,
        })
    }

    /// Start signing with a new key. The current key becomes the
    /// previous one and is honoured for the grace period from now.
    pub fn rotate(&self, private_pem: &str, public_pem: &str, kid: &str) -> AuthResult<Self> {
        let signing_key = EncodingKey::from_ed_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::Crypto(format!("bad private key: {e}")))?;
        let retired = VerifyingKey {
            retired_at: Some(self.clock.now()),
            ..self.current.clone()
        };
        Ok(Self {
            clock: self.clock.clone(),
            issuer: self.issuer.clone(),
            lifetime: self.lifetime,
            skew: self.skew,
            grace: self.grace,
            signing_kid: kid.to_string(),
            signing_key,
            current: VerifyingKey {
                kid: kid.to_string(),
                key: decoding_key(public_pem)?,
                retired_at: None,
            },
            previous: Some(retired),
            validation: self.validation.clone(),
        })
    }

    pub fn access_token_lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Issue a signed EdDSA (Ed25519) JWT access token for `user`.
    pub fn issue(&self, user: &User) -> AuthResult<IssuedAccessToken> {
        let now = self.clock.now();
        let expires_at = now + self.lifetime;
        let claims = AccessTokenClaims {
            sub: user.id.to_string(),
            role: user.role,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.signing_kid.clone());
        let token = jsonwebtoken::encode(&header, &claims, &self.signing_key)
            .map_err(|e| AuthError::Crypto(format!("JWT encode: {e}")))?;

        Ok(IssuedAccessToken {
            token,
            claims,
            expires_at,
        })
    }

    /// Verify signature first, then expiry.
    pub fn verify(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::MalformedToken(e.to_string()))?;
        if header.alg != Algorithm::EdDSA {
            return Err(AuthError::MalformedToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }

        let now = self.clock.now();
        let key = self.key_for(header.kid.as_deref(), now)?;

        let claims = jsonwebtoken::decode::<AccessTokenClaims>(token, &key.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::MalformedToken(e.to_string()),
            })?;

        if claims.exp + self.skew.num_seconds() < now.timestamp() {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }

    fn key_for(&self, kid: Option<&str>, now: DateTime<Utc>) -> AuthResult<&VerifyingKey> {
        let Some(kid) = kid else {
            return Ok(&self.current);
        };
        if kid == self.current.kid {
            return Ok(&self.current);
        }
        match &self.previous {
            Some(previous) if previous.kid == kid => {
                let retired_at = previous.retired_at.unwrap_or(now);
                if now < retired_at + self.grace {
                    Ok(previous)
                } else {
                    Err(AuthError::InvalidSignature)
                }
            }
            _ => Err(AuthError::InvalidSignature),
        }
    }
}

fn decoding_key(pem: &str) -> AuthResult<DecodingKey> {
    DecodingKey::from_ed_pem(pem.as_bytes())
        .map_err(|e| AuthError::Crypto(format!("bad public key: {e}")))
}

/// Generate a cryptographically random opaque refresh token
/// (32 bytes → base64url-encoded, no padding).
pub fn generate_refresh_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rand::Rng::random(&mut rng);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash of a raw refresh token, hex-encoded.
///
/// This is the value stored in the database as the session record id.
pub fn hash_refresh_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}
