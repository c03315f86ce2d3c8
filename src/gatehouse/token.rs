//! Signed identity tokens (compact JWT, HS256).
//!
//! `header.claims.signature`, each part base64url without padding. The signature
//! is an HMAC-SHA256 tag over `header.claims` and is checked before any claim is
//! decoded, so a tampered token never reaches the expiry check.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub v: u8,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token issuance failed: {0}")]
    Issuance(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

/// Mints and verifies identity tokens with a shared secret.
pub struct TokenIssuer {
    secret: SecretString,
    issuer: String,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: SecretString, issuer: impl Into<String>) -> Self {
        Self {
            secret,
            issuer: issuer.into(),
        }
    }

    /// Issue a token for `subject` that expires `ttl` from now.
    ///
    /// # Errors
    /// Returns `TokenError::Issuance` if the secret is missing or the ttl is zero.
    pub fn issue(&self, subject: &str, ttl: Duration) -> Result<String, TokenError> {
        self.issue_at(subject, ttl, now_unix_seconds())
    }

    /// Issue a token as if the current time were `now_unix_seconds`.
    ///
    /// # Errors
    /// Returns `TokenError::Issuance` if the secret is missing or the ttl is zero.
    pub fn issue_at(
        &self,
        subject: &str,
        ttl: Duration,
        now_unix_seconds: i64,
    ) -> Result<String, TokenError> {
        let ttl_seconds = i64::try_from(ttl.as_secs())
            .map_err(|_| TokenError::Issuance("ttl out of range".to_string()))?;
        if ttl_seconds == 0 {
            return Err(TokenError::Issuance("ttl must be positive".to_string()));
        }

        let claims = TokenClaims {
            v: TOKEN_VERSION,
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            iat: now_unix_seconds,
            exp: now_unix_seconds.saturating_add(ttl_seconds),
            jti: Uuid::new_v4().to_string(),
        };

        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify a token and return its subject.
    ///
    /// # Errors
    /// `InvalidSignature` for malformed or tampered tokens, `Expired` once `exp` passed.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        self.verify_at(token, now_unix_seconds())
            .map(|claims| claims.sub)
    }

    /// Verify a token against an explicit clock and return the decoded claims.
    ///
    /// # Errors
    /// `InvalidSignature` for malformed or tampered tokens, `Expired` once `exp` passed.
    pub fn verify_at(&self, token: &str, now_unix_seconds: i64) -> Result<TokenClaims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::InvalidSignature)?;
        let claims_b64 = parts.next().ok_or(TokenError::InvalidSignature)?;
        let sig_b64 = parts.next().ok_or(TokenError::InvalidSignature)?;
        if parts.next().is_some() {
            return Err(TokenError::InvalidSignature);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::InvalidSignature)?;
        // Trailing pad bits must be zero so each signature has one encoding.
        if Base64UrlUnpadded::encode_string(&signature) != sig_b64 {
            return Err(TokenError::InvalidSignature);
        }
        // A missing secret cannot have signed anything.
        let mut mac = self.mac().map_err(|_| TokenError::InvalidSignature)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        // verify_slice compares in constant time.
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(TokenError::InvalidSignature);
        }

        let claims: TokenClaims = b64d_json(claims_b64)?;
        if claims.v != TOKEN_VERSION || claims.iss != self.issuer {
            return Err(TokenError::InvalidSignature);
        }
        if claims.exp <= now_unix_seconds {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        let key = self.secret.expose_secret().as_bytes();
        if key.is_empty() {
            return Err(TokenError::Issuance("signing secret is empty".to_string()));
        }
        HmacSha256::new_from_slice(key).map_err(|e| TokenError::Issuance(e.to_string()))
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|e| TokenError::Issuance(e.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

// Only called after the signature checked out; a decode failure still means the
// token was not produced by this issuer.
fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::InvalidSignature)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::InvalidSignature)
}

pub(crate) fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
