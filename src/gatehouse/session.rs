//! Cookie-referenced session records.
//!
//! The cookie carries a random opaque id; the record (and the identity token inside
//! it) stays server-side. Stores only ever see the SHA-256 of the id.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use super::store::{SessionStore, SessionValues};

pub const DEFAULT_SESSION_COOKIE_NAME: &str = "session";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store unavailable: {0:#}")]
    Store(anyhow::Error),
    #[error("failed to persist session: {0:#}")]
    Persistence(anyhow::Error),
}

/// Lifetime requested when persisting a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    /// Keep the record for the configured TTL.
    Active,
    /// Drop the record and expire the cookie now.
    Immediate,
}

/// In-flight view of a session record.
#[derive(Clone, Debug)]
pub struct Session {
    id: String,
    values: SessionValues,
    is_new: bool,
}

impl Session {
    fn fresh() -> Result<Self, SessionError> {
        Ok(Self {
            id: generate_session_id().map_err(SessionError::Store)?,
            values: SessionValues::new(),
            is_new: true,
        })
    }

    /// True when no stored record backed the request cookie.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn delete_value(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// Resolves, mutates and persists sessions on top of a `SessionStore`.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
    ttl: Duration,
    secure: bool,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            ttl: DEFAULT_SESSION_TTL,
            secure: false,
        }
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Resolve the request's session cookie, or start a new anonymous session.
    ///
    /// Missing, unknown and expired cookies all yield a fresh session.
    ///
    /// # Errors
    /// Returns `SessionError::Store` only when the store cannot be reached.
    pub async fn get_or_create(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        let Some(id) = self.extract_session_id(headers) else {
            return Session::fresh();
        };

        match self
            .store
            .load(&hash_session_id(&id))
            .await
            .map_err(SessionError::Store)?
        {
            Some(values) => Ok(Session {
                id,
                values,
                is_new: false,
            }),
            None => {
                debug!("session cookie did not resolve to a record");
                Session::fresh()
            }
        }
    }

    /// Write the record and return the `Set-Cookie` value for the response.
    ///
    /// # Errors
    /// Returns `SessionError::Persistence` when the store write fails.
    pub async fn persist(
        &self,
        session: &Session,
        expiry: Expiry,
    ) -> Result<HeaderValue, SessionError> {
        let id_hash = hash_session_id(&session.id);
        let cookie = match expiry {
            Expiry::Active => {
                self.store
                    .save(&id_hash, &session.values, self.ttl)
                    .await
                    .map_err(SessionError::Persistence)?;
                self.session_cookie(&session.id)
            }
            Expiry::Immediate => {
                self.store
                    .delete(&id_hash)
                    .await
                    .map_err(SessionError::Persistence)?;
                self.clear_session_cookie()
            }
        };
        cookie.map_err(|e| SessionError::Persistence(e.into()))
    }

    fn session_cookie(&self, id: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let max_age = self.ttl.as_secs();
        let mut cookie = format!(
            "{}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
            self.cookie_name
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    fn clear_session_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.cookie_name
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    fn extract_session_id(&self, headers: &HeaderMap) -> Option<String> {
        for header in headers.get_all(COOKIE) {
            let Ok(value) = header.to_str() else {
                continue;
            };
            for pair in value.split(';') {
                let mut parts = pair.trim().splitn(2, '=');
                let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                    continue;
                };
                let val = val.trim();
                if key.trim() == self.cookie_name && !val.is_empty() {
                    return Some(val.to_string());
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("cookie_name", &self.cookie_name)
            .field("ttl", &self.ttl)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

/// Spawn a background task that drops expired session records on a fixed cadence.
pub fn spawn_session_sweeper(
    store: Arc<dyn SessionStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // interval() panics on a zero period.
        let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => (),
                Ok(purged) => debug!(purged, "purged expired sessions"),
                Err(err) => error!("Failed to purge expired sessions: {err:#}"),
            }
        }
    })
}

/// 32 random bytes, base64url. Carries no identity data.
fn generate_session_id() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| anyhow::anyhow!("failed to generate session id: {e}"))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a session id so raw values never touch the store.
fn hash_session_id(id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.finalize().to_vec()
}
