//! OAuth2 state management for CSRF protection.
//!
//! The pending authorization is kept in the session's identity store under the
//! broker id, so it travels with the browser session rather than the process.

use crate::error::{OAuth2Error, OAuth2Result};
use chrono::{DateTime, Duration, Utc};
use ras_identity_core::IdentityStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OAuth2 state information stored during authorization flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2State {
    pub state: String,
    pub redirect_uri: String,
    pub code_verifier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OAuth2State {
    pub fn new(
        redirect_uri: String,
        code_verifier: Option<String>,
        ttl_seconds: u64,
    ) -> OAuth2Result<Self> {
        let state = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let expires_at = i64::try_from(ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or_else(|| {
                OAuth2Error::Config(format!("state ttl of {}s is out of range", ttl_seconds))
            })?;

        Ok(Self {
            state,
            redirect_uri,
            code_verifier,
            created_at,
            expires_at,
        })
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// One broker's slot for pending authorizations inside a session store.
pub struct FlowStateStore<'a> {
    store: &'a mut IdentityStore,
    broker_id: &'a str,
}

impl<'a> FlowStateStore<'a> {
    pub fn new(store: &'a mut IdentityStore, broker_id: &'a str) -> Self {
        Self { store, broker_id }
    }

    /// Store a new state, replacing any authorization still pending.
    pub fn store(&mut self, state: &OAuth2State) -> OAuth2Result<()> {
        self.store.put_flow_state(self.broker_id, state)?;
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.store.has_flow_state(self.broker_id)
    }

    /// Retrieve and remove the pending state. It is consumed even when the
    /// `state` parameter does not match, so a guessed value gets one try.
    pub fn retrieve(&mut self, state: &str) -> OAuth2Result<OAuth2State> {
        let pending: OAuth2State = self
            .store
            .take_flow_state(self.broker_id)?
            .ok_or(OAuth2Error::NoPendingAuthorization)?;

        if pending.state != state {
            return Err(OAuth2Error::StateMismatch);
        }

        if pending.is_expired() {
            return Err(OAuth2Error::NoPendingAuthorization);
        }

        Ok(pending)
    }
}
