//! Storage seams for credentials and session records.
//!
//! Both traits are object safe so the service can hold `Arc<dyn ...>` and tests can
//! swap in the in-memory implementations. Uniqueness of usernames and atomic
//! replacement of a session record are the store's job, not the caller's.

mod memory;
mod postgres;

pub use memory::{MemoryCredentialStore, MemorySessionStore};
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Key/value pairs held by a session record.
pub type SessionValues = BTreeMap<String, String>;

/// Credential row as written on registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCredential {
    pub username: String,
    pub password_hash: String,
    pub created_at_unix: i64,
}

/// Outcome of inserting a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Conflict,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stored password hash for `username`, `None` when the user does not exist.
    async fn password_hash(&self, username: &str) -> Result<Option<String>>;

    /// Insert a credential; a duplicate username is `InsertOutcome::Conflict`.
    async fn insert(&self, credential: &NewCredential) -> Result<InsertOutcome>;

    /// Cheap reachability check used by `/health`.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Values of an unexpired session, `None` when missing or expired.
    async fn load(&self, id_hash: &[u8]) -> Result<Option<SessionValues>>;

    /// Create or replace the record, expiring `ttl` from now.
    async fn save(&self, id_hash: &[u8], values: &SessionValues, ttl: Duration) -> Result<()>;

    /// Remove the record; removing a missing record is not an error.
    async fn delete(&self, id_hash: &[u8]) -> Result<()>;

    /// Remove every expired record and return how many were dropped.
    async fn purge_expired(&self) -> Result<u64>;
}
