//! Postgres-backed credential and session stores (see `sql/schema.sql`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row};
use std::time::Duration;
use tracing::{info_span, Instrument};

use super::{CredentialStore, InsertOutcome, NewCredential, SessionStore, SessionValues};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn password_hash(&self, username: &str) -> Result<Option<String>> {
        let query = "SELECT password_hash FROM users WHERE username = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup credential")?;

        Ok(row.map(|row| row.get("password_hash")))
    }

    async fn insert(&self, credential: &NewCredential) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO users (username, password_hash, created_at)
            VALUES ($1, $2, to_timestamp($3::double precision))
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        #[allow(clippy::cast_precision_loss)]
        let created_at = credential.created_at_unix as f64;
        match sqlx::query(query)
            .bind(&credential.username)
            .bind(&credential.password_hash)
            .bind(created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
        {
            Ok(_) => Ok(InsertOutcome::Created),
            // Two registrations racing past the lookup both reach here; the unique
            // index decides the winner.
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert credential"),
        }
    }

    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn load(&self, id_hash: &[u8]) -> Result<Option<SessionValues>> {
        let query = r"
            SELECT values_json::text AS values_json
            FROM sessions
            WHERE id_hash = $1 AND expires_at > NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let text: String = row.get("values_json");
        let values = serde_json::from_str(&text).context("failed to decode session values")?;
        Ok(Some(values))
    }

    async fn save(&self, id_hash: &[u8], values: &SessionValues, ttl: Duration) -> Result<()> {
        let query = r"
            INSERT INTO sessions (id_hash, values_json, expires_at)
            VALUES ($1, $2::jsonb, NOW() + ($3 * INTERVAL '1 second'))
            ON CONFLICT (id_hash) DO UPDATE
                SET values_json = EXCLUDED.values_json,
                    expires_at = EXCLUDED.expires_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPSERT",
            db.statement = query
        );
        let payload = serde_json::to_string(values).context("failed to encode session values")?;
        let ttl_seconds = i64::try_from(ttl.as_secs()).context("session ttl out of range")?;
        sqlx::query(query)
            .bind(id_hash)
            .bind(payload)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to save session")?;
        Ok(())
    }

    async fn delete(&self, id_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM sessions WHERE id_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE expires_at <= NOW()";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired sessions")?;
        Ok(result.rows_affected())
    }
}
