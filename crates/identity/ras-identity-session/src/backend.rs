//! Session persistence.

use crate::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ras_identity_core::{IdentityResult, IdentityStore};

/// Durable key-value storage of identity stores by session id.
///
/// Atomicity across a load/save pair is provided by
/// [`SessionManager`](crate::SessionManager), not by the backend.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn load(&self, session: &SessionId) -> IdentityResult<Option<IdentityStore>>;

    async fn save(&self, session: &SessionId, store: &IdentityStore) -> IdentityResult<()>;

    async fn remove(&self, session: &SessionId) -> IdentityResult<()>;
}

struct StoredSession {
    data: String,
    expires_at: DateTime<Utc>,
}

/// In-memory backend. Stores are kept serialized, the way an external store
/// would hold them, and expire after `ttl` without access.
pub struct InMemorySessionBackend {
    sessions: DashMap<SessionId, StoredSession>,
    ttl: Duration,
}

impl InMemorySessionBackend {
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(24))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, stored| stored.expires_at >= now);
        before.saturating_sub(self.sessions.len())
    }
}

impl Default for InMemorySessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionBackend for InMemorySessionBackend {
    async fn load(&self, session: &SessionId) -> IdentityResult<Option<IdentityStore>> {
        let now = Utc::now();

        if let Some(mut stored) = self.sessions.get_mut(session) {
            if stored.expires_at >= now {
                stored.expires_at = now + self.ttl;
                return Ok(Some(serde_json::from_str(&stored.data)?));
            }
        }

        self.sessions
            .remove_if(session, |_, stored| stored.expires_at < now);
        Ok(None)
    }

    async fn save(&self, session: &SessionId, store: &IdentityStore) -> IdentityResult<()> {
        let data = serde_json::to_string(store)?;
        self.sessions.insert(
            session.clone(),
            StoredSession {
                data,
                expires_at: Utc::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, session: &SessionId) -> IdentityResult<()> {
        self.sessions.remove(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_identity_core::Identity;

    #[tokio::test]
    async fn test_save_load_remove() {
        let backend = InMemorySessionBackend::new();
        let session = SessionId::generate();

        assert!(backend.load(&session).await.unwrap().is_none());

        let mut store = IdentityStore::new();
        store.insert_identity(Identity::new("local", "alice"));
        backend.save(&session, &store).await.unwrap();

        let loaded = backend.load(&session).await.unwrap().unwrap();
        assert_eq!(loaded.identity("local").unwrap().subject, "alice");

        backend.remove(&session).await.unwrap();
        assert!(backend.load(&session).await.unwrap().is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_expire() {
        let backend = InMemorySessionBackend::with_ttl(Duration::seconds(-1));
        let session = SessionId::generate();

        let mut store = IdentityStore::new();
        store.insert_identity(Identity::new("local", "alice"));
        backend.save(&session, &store).await.unwrap();
        backend.save(&SessionId::generate(), &store).await.unwrap();

        assert!(backend.load(&session).await.unwrap().is_none());
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.cleanup_expired(), 1);
        assert!(backend.is_empty());
    }
}
