//! In-memory repositories
//!
//! Map-backed implementations of the repository traits for tests and for
//! embedding without a database. Each mutation holds the write lock for
//! its whole check-and-set, which gives the same single-winner behavior as
//! the conditional SQL statements.

use super::{IdentityRepository, SessionRepository};
use crate::models::{Identity, IdentityId, NewIdentity, Session};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct IdentityTable {
    next_id: IdentityId,
    rows: HashMap<IdentityId, Identity>,
}

/// In-memory identity repository
#[derive(Default)]
pub struct MemoryIdentityRepository {
    table: RwLock<IdentityTable>,
    /// Cascades deletes into the session table like the foreign key does
    sessions: Option<Arc<MemorySessionRepository>>,
}

impl MemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete sessions of removed identities from `sessions`
    pub fn with_sessions(sessions: Arc<MemorySessionRepository>) -> Self {
        Self {
            table: RwLock::default(),
            sessions: Some(sessions),
        }
    }
}

#[async_trait]
impl IdentityRepository for MemoryIdentityRepository {
    async fn create(&self, identity: &NewIdentity) -> Result<Option<Identity>> {
        let mut table = self.table.write().await;
        if table
            .rows
            .values()
            .any(|row| row.login_key == identity.login_key)
        {
            return Ok(None);
        }

        table.next_id += 1;
        let created = identity.clone().into_identity(table.next_id);
        table.rows.insert(created.id, created.clone());
        Ok(Some(created))
    }

    async fn get_by_id(&self, id: IdentityId) -> Result<Option<Identity>> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn get_by_login_key(&self, login_key: &str) -> Result<Option<Identity>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .find(|row| row.login_key == login_key)
            .cloned())
    }

    async fn update_secret(&self, id: IdentityId, credential_secret: &str) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(row) => {
                row.credential_secret = credential_secret.to_string();
                row.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_secret(&self, id: IdentityId, current: &str, new: &str) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(row) if row.credential_secret == current => {
                row.credential_secret = new.to_string();
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: IdentityId) -> Result<bool> {
        let removed = self.table.write().await.rows.remove(&id).is_some();
        if removed {
            if let Some(sessions) = &self.sessions {
                sessions.remove_identity(id).await;
            }
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.table.read().await.rows.len() as i64)
    }
}

/// In-memory session repository
#[derive(Default)]
pub struct MemorySessionRepository {
    rows: RwLock<HashMap<String, Session>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn remove_identity(&self, identity_id: IdentityId) {
        self.rows
            .write()
            .await
            .retain(|_, session| session.identity_id != identity_id);
    }

    fn is_live(session: &Session, now: DateTime<Utc>) -> bool {
        !session.revoked && session.expires_at > now
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn insert(&self, session: &Session) -> Result<bool> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&session.token) {
            return Ok(false);
        }
        rows.insert(session.token.clone(), session.clone());
        Ok(true)
    }

    async fn get(&self, token: &str) -> Result<Option<Session>> {
        Ok(self.rows.read().await.get(token).cloned())
    }

    async fn refresh(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(token) {
            Some(session) if Self::is_live(session, now) && session.expires_at < expires_at => {
                session.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke(&self, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(token) {
            Some(session) if Self::is_live(session, now) => {
                session.revoked = true;
                session.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_by_identity(&self, identity_id: IdentityId, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut count = 0;
        for session in rows.values_mut() {
            if session.identity_id == identity_id && Self::is_live(session, now) {
                session.revoked = true;
                session.revoked_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, session| session.expires_at > now);
        Ok((before - rows.len()) as u64)
    }

    async fn list_by_identity(&self, identity_id: IdentityId) -> Result<Vec<Session>> {
        let rows = self.rows.read().await;
        let mut sessions: Vec<Session> = rows
            .values()
            .filter(|session| session.identity_id == identity_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }
}
