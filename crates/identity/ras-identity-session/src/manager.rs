//! Per-session locking around the session backend.

use crate::SessionId;
use crate::backend::{InMemorySessionBackend, SessionBackend};
use dashmap::DashMap;
use ras_identity_core::{IdentityResult, IdentityStore};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

type LockTable = DashMap<SessionId, Arc<Mutex<()>>>;

pub struct SessionManager {
    backend: Arc<dyn SessionBackend>,
    locks: Arc<LockTable>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySessionBackend::new()))
    }

    pub fn backend(&self) -> &Arc<dyn SessionBackend> {
        &self.backend
    }

    /// Sessions with a request currently holding or awaiting their lock.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    /// Current store of a session without taking its lock. An unknown session
    /// reads as an empty store.
    pub async fn snapshot(&self, session: &SessionId) -> IdentityResult<IdentityStore> {
        Ok(self.backend.load(session).await?.unwrap_or_default())
    }

    /// Take the session's lock and load its store. Changes are persisted by
    /// [`SessionGuard::commit`]; dropping the guard discards them.
    pub async fn lock(&self, session: &SessionId) -> IdentityResult<SessionGuard> {
        let mutex = self.locks.entry(session.clone()).or_default().clone();
        let permit = mutex.lock_owned().await;

        let mut guard = SessionGuard {
            session: session.clone(),
            store: IdentityStore::new(),
            backend: Arc::clone(&self.backend),
            locks: Arc::clone(&self.locks),
            permit: Some(permit),
        };
        guard.store = self.backend.load(session).await?.unwrap_or_default();

        Ok(guard)
    }
}

/// Exclusive access to one session's identity store for the duration of a
/// single request.
pub struct SessionGuard {
    session: SessionId,
    store: IdentityStore,
    backend: Arc<dyn SessionBackend>,
    locks: Arc<LockTable>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl SessionGuard {
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Persist the store and release the lock. An empty store removes the
    /// session from the backend.
    pub async fn commit(self) -> IdentityResult<()> {
        if self.store.is_empty() {
            debug!(session = %self.session, "Removing empty session");
            self.backend.remove(&self.session).await
        } else {
            self.backend.save(&self.session, &self.store).await
        }
    }
}

impl Deref for SessionGuard {
    type Target = IdentityStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            // Only the table still references the mutex: nobody holds or awaits it
            self.locks
                .remove_if(&self.session, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}
