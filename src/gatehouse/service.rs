//! Register, login, logout and session authentication.
//!
//! Flow Overview: register hashes and stores a credential; login verifies it, mints
//! a token and parks it in the session record; logout drops the record and expires
//! the cookie. The service holds no state of its own beyond its collaborators.

use axum::http::{HeaderMap, HeaderValue};
use secrecy::SecretString;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument};

use super::{
    password::{HashError, Hasher},
    session::{Expiry, SessionError, SessionManager},
    state::AuthConfig,
    store::{CredentialStore, InsertOutcome, NewCredential, SessionStore},
    token::{now_unix_seconds, TokenIssuer},
};

/// Session key holding the identity token.
pub const TOKEN_SESSION_KEY: &str = "token";

// Hashed once per hasher; unknown usernames are verified against it.
const DUMMY_PASSWORD: &str = "gatehouse-unknown-user";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username is already taken")]
    Conflict,
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
    #[error("session persistence failed: {0:#}")]
    Persistence(anyhow::Error),
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Store(e) => Self::Internal(e),
            SessionError::Persistence(e) => Self::Persistence(e),
        }
    }
}

pub struct AuthService {
    config: AuthConfig,
    credentials: Arc<dyn CredentialStore>,
    hasher: Hasher,
    issuer: TokenIssuer,
    sessions: SessionManager,
    dummy_hash: OnceCell<String>,
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        credentials: Arc<dyn CredentialStore>,
        session_store: Arc<dyn SessionStore>,
        token_secret: SecretString,
    ) -> Self {
        let issuer = TokenIssuer::new(token_secret, config.token_issuer());
        let sessions = SessionManager::new(session_store)
            .with_cookie_name(config.session_cookie_name())
            .with_ttl(config.session_ttl())
            .with_secure_cookie(config.session_cookie_secure());
        Self {
            config,
            credentials,
            hasher: Hasher::new(),
            issuer,
            sessions,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Replace the default Argon2 cost.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Hasher) -> Self {
        self.hasher = hasher;
        self.dummy_hash = OnceCell::new();
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Create a credential. Registration does not log the user in.
    ///
    /// # Errors
    /// `Validation` for empty fields, `Conflict` when the username exists,
    /// `Internal` for store or hashing failures.
    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str) -> Result<(), AuthError> {
        validate(username, password)?;

        match self.credentials.password_hash(username).await {
            Ok(Some(_)) => {
                info!("registration rejected: username taken");
                return Err(AuthError::Conflict);
            }
            Ok(None) => (),
            Err(err) => {
                error!("Failed to lookup credential: {err:#}");
                return Err(AuthError::Internal(err));
            }
        }

        let password_hash = self.hash_password(password).await?;

        let credential = NewCredential {
            username: username.to_string(),
            password_hash,
            created_at_unix: now_unix_seconds(),
        };
        match self.credentials.insert(&credential).await {
            Ok(InsertOutcome::Created) => {
                info!("registration successful");
                Ok(())
            }
            Ok(InsertOutcome::Conflict) => {
                info!("registration rejected: username taken by concurrent insert");
                Err(AuthError::Conflict)
            }
            Err(err) => {
                error!("Failed to insert credential: {err:#}");
                Err(AuthError::Internal(err))
            }
        }
    }

    /// Verify a credential and bind a fresh token to the request's session.
    ///
    /// Returns the `Set-Cookie` value; the token itself never leaves the server.
    ///
    /// # Errors
    /// `Validation` for empty fields, `InvalidCredentials` for an unknown user or a
    /// wrong password, `Internal`/`Persistence` for infrastructure failures.
    #[instrument(skip(self, headers, password))]
    pub async fn login(
        &self,
        headers: &HeaderMap,
        username: &str,
        password: &str,
    ) -> Result<HeaderValue, AuthError> {
        validate(username, password)?;

        let stored_hash = match self.credentials.password_hash(username).await {
            Ok(Some(hash)) => hash,
            Ok(None) => {
                // Same answer and the same Argon2 cost as a wrong password; only the
                // log tells them apart.
                self.verify_dummy(password).await;
                info!("login failed: unknown username");
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => {
                error!("Failed to lookup credential: {err:#}");
                return Err(AuthError::Internal(err));
            }
        };

        if !self.verify_password(stored_hash, password).await? {
            info!("login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self
            .issuer
            .issue(username, self.config.token_ttl())
            .map_err(|err| {
                error!("Failed to issue token: {err}");
                AuthError::Internal(err.into())
            })?;

        let mut session = self.sessions.get_or_create(headers).await.map_err(|err| {
            error!("Failed to get session: {err}");
            AuthError::from(err)
        })?;
        session.set_value(TOKEN_SESSION_KEY, token);
        let cookie = self
            .sessions
            .persist(&session, Expiry::Active)
            .await
            .map_err(|err| {
                error!("Failed to save session: {err}");
                AuthError::from(err)
            })?;

        info!("login successful");
        Ok(cookie)
    }

    /// Drop the token and expire the session. Succeeds without a prior session.
    ///
    /// # Errors
    /// `Persistence` when the session store cannot be read or written.
    #[instrument(skip(self, headers))]
    pub async fn logout(&self, headers: &HeaderMap) -> Result<HeaderValue, AuthError> {
        let mut session = self.sessions.get_or_create(headers).await.map_err(|err| {
            error!("Failed to get session: {err}");
            match err {
                SessionError::Store(e) | SessionError::Persistence(e) => AuthError::Persistence(e),
            }
        })?;
        session.delete_value(TOKEN_SESSION_KEY);
        let cookie = self
            .sessions
            .persist(&session, Expiry::Immediate)
            .await
            .map_err(|err| {
                error!("Failed to save session: {err}");
                AuthError::from(err)
            })?;

        debug!(had_session = !session.is_new(), "logout complete");
        Ok(cookie)
    }

    /// Resolve the request's session to the authenticated username.
    ///
    /// Missing sessions and invalid or expired tokens are anonymous (`Ok(None)`).
    ///
    /// # Errors
    /// `Internal` when the session store cannot be reached.
    #[instrument(skip(self, headers))]
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<String>, AuthError> {
        let session = self.sessions.get_or_create(headers).await.map_err(|err| {
            error!("Failed to get session: {err}");
            AuthError::from(err)
        })?;
        let Some(token) = session.value(TOKEN_SESSION_KEY) else {
            return Ok(None);
        };
        match self.issuer.verify(token) {
            Ok(subject) => Ok(Some(subject)),
            Err(err) => {
                debug!("session token rejected: {err}");
                Ok(None)
            }
        }
    }

    /// Reachability of the credential store.
    ///
    /// # Errors
    /// Returns the store error when it cannot be reached.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.credentials.ping().await
    }

    async fn verify_dummy(&self, password: &str) {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hash_password(DUMMY_PASSWORD))
            .await;
        match dummy {
            Ok(hash) => {
                let _ = self.verify_password(hash.clone(), password).await;
            }
            Err(err) => debug!("dummy hash unavailable: {err}"),
        }
    }

    // Argon2 is CPU bound; run it on the blocking pool.
    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|err| {
                error!("Password hashing task failed: {err}");
                AuthError::Internal(err.into())
            })?
            .map_err(|err: HashError| {
                error!("Failed to hash password: {err}");
                AuthError::Internal(err.into())
            })
    }

    async fn verify_password(&self, hash: String, password: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
            .await
            .map_err(|err| {
                error!("Password verification task failed: {err}");
                AuthError::Internal(err.into())
            })?
            .map_err(|err: HashError| {
                error!("Failed to verify password: {err}");
                AuthError::Internal(err.into())
            })
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .field("issuer", &self.issuer)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

fn validate(username: &str, password: &str) -> Result<(), AuthError> {
    if username.is_empty() || password.is_empty() {
        return Err(AuthError::Validation("Username and password are required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatehouse::store::{MemoryCredentialStore, MemorySessionStore};
    use anyhow::{anyhow, Context, Result};
    use async_trait::async_trait;
    use axum::http::header::COOKIE;
    use std::time::Duration;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const WEEK: i64 = 7 * 24 * 60 * 60;

    struct Harness {
        service: AuthService,
        credentials: Arc<MemoryCredentialStore>,
        sessions: Arc<MemorySessionStore>,
    }

    fn harness() -> Result<Harness> {
        let credentials = Arc::new(MemoryCredentialStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let service = AuthService::new(
            AuthConfig::new(),
            credentials.clone(),
            sessions.clone(),
            SecretString::from(SECRET),
        )
        .with_hasher(Hasher::with_params(8, 1, 1)?);
        Ok(Harness {
            service,
            credentials,
            sessions,
        })
    }

    fn cookie_from(set_cookie: &HeaderValue) -> Result<HeaderMap> {
        let pair = set_cookie
            .to_str()?
            .split(';')
            .next()
            .context("empty set-cookie")?
            .to_string();
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(&pair)?);
        Ok(headers)
    }

    #[tokio::test]
    async fn register_stores_hash_not_plaintext() -> Result<()> {
        let h = harness()?;
        h.service.register("alice", "pw1").await?;
        let row = h.credentials.get("alice").await.context("missing row")?;
        assert_ne!(row.password_hash, "pw1");
        assert!(row.password_hash.starts_with("$argon2id$"));
        assert!((now_unix_seconds() - row.created_at_unix).abs() < 5);
        // Registration does not create a session.
        assert_eq!(h.sessions.active().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn register_twice_conflicts_regardless_of_password() -> Result<()> {
        let h = harness()?;
        h.service.register("alice", "pw1").await?;
        let second = h.service.register("alice", "pw2").await;
        assert!(matches!(second, Err(AuthError::Conflict)));
        assert_eq!(h.credentials.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_fields_fail_validation() -> Result<()> {
        let h = harness()?;
        for (username, password) in [("", "pw"), ("alice", ""), ("", "")] {
            assert!(matches!(
                h.service.register(username, password).await,
                Err(AuthError::Validation(_))
            ));
            assert!(matches!(
                h.service.login(&HeaderMap::new(), username, password).await,
                Err(AuthError::Validation(_))
            ));
        }
        assert!(h.credentials.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn login_unknown_user_is_invalid_credentials() -> Result<()> {
        let h = harness()?;
        let result = h.service.login(&HeaderMap::new(), "ghost", "pw").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        Ok(())
    }

    #[tokio::test]
    async fn login_unknown_user_still_runs_password_verify() -> Result<()> {
        let h = harness()?;
        assert!(!h.service.dummy_hash.initialized());

        let result = h.service.login(&HeaderMap::new(), "ghost", "pw").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));

        let dummy = h.service.dummy_hash.get().context("dummy hash not computed")?;
        assert!(dummy.starts_with("$argon2id$v=19$m=8,t=1,p=1$"));

        // Swapping the hasher drops the cached hash so the cost follows the new params.
        let service = h.service.with_hasher(Hasher::with_params(16, 1, 1)?);
        assert!(!service.dummy_hash.initialized());
        Ok(())
    }

    #[tokio::test]
    async fn login_unknown_user_costs_as_much_as_wrong_password() -> Result<()> {
        let service = AuthService::new(
            AuthConfig::new(),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(MemorySessionStore::new()),
            SecretString::from(SECRET),
        )
        .with_hasher(Hasher::with_params(4096, 4, 1)?);
        service.register("alice", "pw1").await?;
        // First unknown-user login also builds the cached hash.
        let _ = service.login(&HeaderMap::new(), "ghost", "pw").await;

        let mut unknown = Duration::ZERO;
        let mut wrong = Duration::ZERO;
        for _ in 0..3 {
            let start = std::time::Instant::now();
            let _ = service.login(&HeaderMap::new(), "ghost", "pw").await;
            unknown += start.elapsed();

            let start = std::time::Instant::now();
            let _ = service.login(&HeaderMap::new(), "alice", "pw2").await;
            wrong += start.elapsed();
        }

        assert!(
            unknown * 4 >= wrong,
            "unknown user {unknown:?} vs wrong password {wrong:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn login_wrong_password_creates_no_token() -> Result<()> {
        let h = harness()?;
        h.service.register("alice", "pw1").await?;
        let result = h.service.login(&HeaderMap::new(), "alice", "pw2").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert_eq!(h.sessions.active().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn login_binds_verifiable_token_to_session() -> Result<()> {
        let h = harness()?;
        h.service.register("alice", "pw1").await?;
        let before = now_unix_seconds();
        let cookie = h.service.login(&HeaderMap::new(), "alice", "pw1").await?;
        assert!(cookie.to_str()?.contains("Max-Age=604800"));

        let session = h
            .service
            .sessions()
            .get_or_create(&cookie_from(&cookie)?)
            .await?;
        let token = session
            .value(TOKEN_SESSION_KEY)
            .context("token missing from session")?;
        let claims = h.service.issuer().verify_at(token, now_unix_seconds())?;
        assert_eq!(claims.sub, "alice");
        assert!((claims.exp - (before + WEEK)).abs() <= 5);
        assert!(claims.exp > claims.iat);

        assert_eq!(
            h.service.authenticate(&cookie_from(&cookie)?).await?,
            Some("alice".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn login_reuses_existing_session() -> Result<()> {
        let h = harness()?;
        h.service.register("alice", "pw1").await?;
        let first = h.service.login(&HeaderMap::new(), "alice", "pw1").await?;
        let second = h
            .service
            .login(&cookie_from(&first)?, "alice", "pw1")
            .await?;
        assert_eq!(
            first.to_str()?.split(';').next(),
            second.to_str()?.split(';').next()
        );
        assert_eq!(h.sessions.active().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn logout_is_idempotent() -> Result<()> {
        let h = harness()?;
        h.service.register("alice", "pw1").await?;
        let cookie = h.service.login(&HeaderMap::new(), "alice", "pw1").await?;
        let request = cookie_from(&cookie)?;

        let cleared = h.service.logout(&request).await?;
        assert!(cleared.to_str()?.contains("Max-Age=0"));
        h.service.logout(&request).await?;
        h.service.logout(&HeaderMap::new()).await?;

        assert_eq!(h.sessions.active().await, 0);
        assert_eq!(h.service.authenticate(&request).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn authenticate_rejects_expired_token() -> Result<()> {
        let credentials = Arc::new(MemoryCredentialStore::new());
        let service = AuthService::new(
            AuthConfig::new().with_token_ttl_seconds(1),
            credentials,
            Arc::new(MemorySessionStore::new()),
            SecretString::from(SECRET),
        )
        .with_hasher(Hasher::with_params(8, 1, 1)?);
        service.register("alice", "pw1").await?;
        let cookie = service.login(&HeaderMap::new(), "alice", "pw1").await?;
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(service.authenticate(&cookie_from(&cookie)?).await?, None);
        Ok(())
    }

    struct BrokenCredentials;

    #[async_trait]
    impl CredentialStore for BrokenCredentials {
        async fn password_hash(&self, _username: &str) -> Result<Option<String>> {
            Err(anyhow!("connection refused"))
        }

        async fn insert(&self, _credential: &NewCredential) -> Result<InsertOutcome> {
            Err(anyhow!("connection refused"))
        }

        async fn ping(&self) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
    }

    struct RacingCredentials;

    #[async_trait]
    impl CredentialStore for RacingCredentials {
        async fn password_hash(&self, _username: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn insert(&self, _credential: &NewCredential) -> Result<InsertOutcome> {
            Ok(InsertOutcome::Conflict)
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    struct BrokenSessions;

    #[async_trait]
    impl SessionStore for BrokenSessions {
        async fn load(&self, _id_hash: &[u8]) -> Result<Option<crate::gatehouse::store::SessionValues>> {
            Err(anyhow!("session backend down"))
        }

        async fn save(
            &self,
            _id_hash: &[u8],
            _values: &crate::gatehouse::store::SessionValues,
            _ttl: Duration,
        ) -> Result<()> {
            Err(anyhow!("session backend down"))
        }

        async fn delete(&self, _id_hash: &[u8]) -> Result<()> {
            Err(anyhow!("session backend down"))
        }

        async fn purge_expired(&self) -> Result<u64> {
            Err(anyhow!("session backend down"))
        }
    }

    #[tokio::test]
    async fn store_failures_are_internal() -> Result<()> {
        let service = AuthService::new(
            AuthConfig::new(),
            Arc::new(BrokenCredentials),
            Arc::new(MemorySessionStore::new()),
            SecretString::from(SECRET),
        );
        assert!(matches!(
            service.register("alice", "pw").await,
            Err(AuthError::Internal(_))
        ));
        assert!(matches!(
            service.login(&HeaderMap::new(), "alice", "pw").await,
            Err(AuthError::Internal(_))
        ));
        assert!(service.ping().await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_insert_conflict_surfaces_as_conflict() -> Result<()> {
        let service = AuthService::new(
            AuthConfig::new(),
            Arc::new(RacingCredentials),
            Arc::new(MemorySessionStore::new()),
            SecretString::from(SECRET),
        )
        .with_hasher(Hasher::with_params(8, 1, 1)?);
        assert!(matches!(
            service.register("alice", "pw").await,
            Err(AuthError::Conflict)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn session_failures_surface_on_login_and_logout() -> Result<()> {
        let credentials = Arc::new(MemoryCredentialStore::new());
        let service = AuthService::new(
            AuthConfig::new(),
            credentials,
            Arc::new(BrokenSessions),
            SecretString::from(SECRET),
        )
        .with_hasher(Hasher::with_params(8, 1, 1)?);
        service.register("alice", "pw1").await?;

        // No cookie: nothing to load, the write fails.
        assert!(matches!(
            service.login(&HeaderMap::new(), "alice", "pw1").await,
            Err(AuthError::Persistence(_))
        ));
        assert!(matches!(
            service.logout(&HeaderMap::new()).await,
            Err(AuthError::Persistence(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_stored_hash_is_internal() -> Result<()> {
        let credentials = Arc::new(MemoryCredentialStore::new());
        credentials
            .insert(&NewCredential {
                username: "alice".to_string(),
                password_hash: "plaintext-by-mistake".to_string(),
                created_at_unix: 0,
            })
            .await?;
        let service = AuthService::new(
            AuthConfig::new(),
            credentials,
            Arc::new(MemorySessionStore::new()),
            SecretString::from(SECRET),
        );
        assert!(matches!(
            service.login(&HeaderMap::new(), "alice", "plaintext-by-mistake").await,
            Err(AuthError::Internal(_))
        ));
        Ok(())
    }
}
