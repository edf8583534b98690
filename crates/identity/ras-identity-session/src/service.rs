use crate::SessionId;
use crate::manager::{SessionGuard, SessionManager};
use ras_identity_core::{Brokers, Identity, IdentityError, IdentityResult};
use std::sync::Arc;
use tracing::{error, info};

/// Role granted to any session holding at least one current identity.
pub const ROLE_USER: &str = "user";

/// Request-scoped view of the identities established in one session.
#[derive(Clone)]
pub struct IdentityService {
    session: SessionId,
    sessions: Arc<SessionManager>,
    brokers: Arc<Brokers>,
}

impl IdentityService {
    pub fn new(session: SessionId, sessions: Arc<SessionManager>, brokers: Arc<Brokers>) -> Self {
        Self {
            session,
            sessions,
            brokers,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn brokers(&self) -> &Brokers {
        &self.brokers
    }

    /// Exclusive access to the underlying store, for multi-step updates.
    pub async fn lock(&self) -> IdentityResult<SessionGuard> {
        self.sessions.lock(&self.session).await
    }

    /// Current identities of every configured broker, in config order.
    /// Expired identities are treated as absent.
    pub async fn identities(&self) -> IdentityResult<Vec<Identity>> {
        let store = self.sessions.snapshot(&self.session).await?;

        for stale in store
            .identities()
            .keys()
            .filter(|id| !self.brokers.contains(id))
        {
            error!(
                session = %self.session,
                broker = %stale,
                "Session holds an identity for an unconfigured broker"
            );
        }

        Ok(self
            .brokers
            .ids()
            .filter_map(|id| store.identity(id))
            .filter(|identity| !identity.is_expired())
            .cloned()
            .collect())
    }

    /// The current identity established through `broker_id`, if any.
    pub async fn identity_for(&self, broker_id: &str) -> IdentityResult<Option<Identity>> {
        if !self.brokers.contains(broker_id) {
            return Err(IdentityError::UnknownBroker(broker_id.to_string()));
        }

        let store = self.sessions.snapshot(&self.session).await?;
        Ok(store
            .identity(broker_id)
            .filter(|identity| !identity.is_expired())
            .cloned())
    }

    /// Forget the identity of one broker. Other brokers are untouched.
    /// `logout/{broker}` ends here once the provider has been asked for its
    /// logout address.
    pub async fn invalidate(&self, broker_id: &str) -> IdentityResult<()> {
        let mut guard = self.lock().await?;
        if guard.invalidate(broker_id).is_some() {
            info!(session = %self.session, broker = %broker_id, "Identity invalidated");
        }
        guard.commit().await
    }

    /// Forget every identity at once, without telling any provider. For host
    /// handlers such as account removal; browser logout uses the chained
    /// `logout` route instead.
    pub async fn invalidate_all(&self) -> IdentityResult<()> {
        let mut guard = self.lock().await?;
        guard.invalidate_all();
        info!(session = %self.session, "All identities invalidated");
        guard.commit().await
    }

    pub async fn roles(&self) -> IdentityResult<Vec<String>> {
        Ok(if self.identities().await?.is_empty() {
            Vec::new()
        } else {
            vec![ROLE_USER.to_string()]
        })
    }
}
