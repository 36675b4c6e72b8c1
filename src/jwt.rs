//! JWT token issuing and validation.
//!
//! Access and refresh tokens share one claim layout and differ only in the
//! `typ` claim, which callers must check through [`TokenCodec::decode_kind`].
//! Expiry is evaluated against the injected [`Clock`] rather than the
//! library's own notion of "now".

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// Token kind for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived token presented on every request
    Access,
    /// Long-lived token exchanged for new access tokens
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// JWT claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// JWT ID, random per token
    pub jti: String,
    /// Subject (username)
    pub sub: String,
    /// Identity reference (user id)
    pub uid: i64,
    /// Token kind
    #[serde(rename = "typ")]
    pub kind: TokenKind,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration time (Unix seconds)
    pub exp: i64,
}

impl Claims {
    /// Expiration as Unix milliseconds.
    pub fn expires_at_ms(&self) -> i64 {
        self.exp.saturating_mul(1000)
    }
}

/// Result of issuing a token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The signed JWT string
    pub token: String,
    /// JWT ID
    pub jti: String,
    /// Issued at (Unix seconds)
    pub issued_at: i64,
    /// Expiration (Unix seconds)
    pub expires_at: i64,
}

/// Stateless signer/verifier for bearer tokens.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    /// Create a codec signing with the given process-wide secret.
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            clock,
        }
    }

    /// Issue a new token. Every call yields a distinct token string, even for
    /// identical inputs within the same second, because the `jti` is random.
    pub fn issue(
        &self,
        subject: &str,
        identity_ref: i64,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now_secs();
        let exp = now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        let jti = uuid::Uuid::new_v4().to_string();

        let claims = Claims {
            jti: jti.clone(),
            sub: subject.to_string(),
            uid: identity_ref,
            kind,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
        })
    }

    /// Validate signature and expiry, returning all claims.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.verify_signature(token)?;
        if claims.expires_at_ms() <= self.clock.now_ms() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Validate signature, expiry and kind.
    pub fn decode_kind(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.decode(token)?;
        if claims.kind != expected {
            return Err(TokenError::WrongKind {
                expected,
                actual: claims.kind,
            });
        }
        Ok(claims)
    }

    /// Expiration of a correctly signed token in Unix milliseconds.
    /// Does not fail for tokens that have already expired.
    pub fn expires_at(&self, token: &str) -> Result<i64, TokenError> {
        self.verify_signature(token).map(|c| c.expires_at_ms())
    }

    /// Verify the signature and claim layout without looking at expiry.
    pub fn verify_signature(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;

        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(TokenError::Malformed)
    }
}

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Failed to encode token: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),
    #[error("Malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),
    #[error("Token expired")]
    Expired,
    #[error("Wrong token kind: expected {}, got {}", expected.as_str(), actual.as_str())]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },
}
