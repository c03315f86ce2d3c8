//! Process-local stores for tests and single-node development runs.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{CredentialStore, InsertOutcome, NewCredential, SessionStore, SessionValues};

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: Mutex<HashMap<String, NewCredential>>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored credentials.
    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }

    /// Full row for `username`, including the creation time.
    pub async fn get(&self, username: &str) -> Option<NewCredential> {
        self.users.lock().await.get(username).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn password_hash(&self, username: &str) -> Result<Option<String>> {
        let users = self.users.lock().await;
        Ok(users.get(username).map(|row| row.password_hash.clone()))
    }

    async fn insert(&self, credential: &NewCredential) -> Result<InsertOutcome> {
        let mut users = self.users.lock().await;
        if users.contains_key(&credential.username) {
            return Ok(InsertOutcome::Conflict);
        }
        users.insert(credential.username.clone(), credential.clone());
        Ok(InsertOutcome::Created)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct SessionEntry {
    values: SessionValues,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, SessionEntry>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired records.
    pub async fn active(&self) -> usize {
        let now = Instant::now();
        let sessions = self.sessions.lock().await;
        sessions.values().filter(|e| e.expires_at > now).count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id_hash: &[u8]) -> Result<Option<SessionValues>> {
        let now = Instant::now();
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(id_hash)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.values.clone()))
    }

    async fn save(&self, id_hash: &[u8], values: &SessionValues, ttl: Duration) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            id_hash.to_vec(),
            SessionEntry {
                values: values.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, id_hash: &[u8]) -> Result<()> {
        self.sessions.lock().await.remove(id_hash);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        Ok(u64::try_from(before - sessions.len()).unwrap_or(u64::MAX))
    }
}
