//! Session-scoped identity cache and logout chain state.

use crate::error::IdentityResult;
use crate::identity::Identity;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Progress of a multi-broker logout spanning several browser round trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutChainState {
    remaining_broker_ids: VecDeque<String>,
    final_redirect_url: String,
    /// Broker whose provider the browser was last sent to.
    #[serde(default)]
    awaiting: Option<String>,
}

impl LogoutChainState {
    /// Duplicate ids are dropped, first occurrence wins.
    pub fn new<I, S>(broker_ids: I, final_redirect_url: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut remaining_broker_ids = VecDeque::new();
        for id in broker_ids {
            let id = id.into();
            if !remaining_broker_ids.contains(&id) {
                remaining_broker_ids.push_back(id);
            }
        }

        Self {
            remaining_broker_ids,
            final_redirect_url: final_redirect_url.into(),
            awaiting: None,
        }
    }

    pub fn remaining(&self) -> impl Iterator<Item = &str> {
        self.remaining_broker_ids.iter().map(String::as_str)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_broker_ids.is_empty()
    }

    pub fn final_redirect_url(&self) -> &str {
        &self.final_redirect_url
    }

    pub fn awaiting(&self) -> Option<&str> {
        self.awaiting.as_deref()
    }

    fn pop_next(&mut self) -> Option<String> {
        self.remaining_broker_ids.pop_front()
    }
}

/// A broker whose logout could not be completed during a logout chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutFailure {
    pub broker_id: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Everything one browser session knows about its identities.
///
/// Holds at most one identity per broker id. `logout_chain` is present only
/// while a logout-all is in progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityStore {
    #[serde(default)]
    identities: BTreeMap<String, Identity>,
    #[serde(default)]
    logout_chain: Option<LogoutChainState>,
    #[serde(default)]
    pending_redirects: BTreeMap<String, String>,
    #[serde(default)]
    flow_state: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    logout_failures: Vec<LogoutFailure>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
            && self.logout_chain.is_none()
            && self.pending_redirects.is_empty()
            && self.flow_state.is_empty()
            && self.logout_failures.is_empty()
    }

    pub fn identities(&self) -> &BTreeMap<String, Identity> {
        &self.identities
    }

    pub fn identity(&self, broker_id: &str) -> Option<&Identity> {
        self.identities.get(broker_id)
    }

    /// Store an identity under its broker id, replacing any previous one.
    pub fn insert_identity(&mut self, identity: Identity) -> Option<Identity> {
        self.identities.insert(identity.broker_id.clone(), identity)
    }

    pub fn remove_identity(&mut self, broker_id: &str) -> Option<Identity> {
        self.identities.remove(broker_id)
    }

    /// Drop a broker's identity together with its pending flow data.
    pub fn invalidate(&mut self, broker_id: &str) -> Option<Identity> {
        self.pending_redirects.remove(broker_id);
        self.flow_state.remove(broker_id);
        self.identities.remove(broker_id)
    }

    /// Drop every identity and all pending flow data. Logout diagnostics and
    /// an in-progress logout chain are kept.
    pub fn invalidate_all(&mut self) {
        self.identities.clear();
        self.pending_redirects.clear();
        self.flow_state.clear();
    }

    pub fn set_pending_redirect(&mut self, broker_id: impl Into<String>, url: impl Into<String>) {
        self.pending_redirects.insert(broker_id.into(), url.into());
    }

    pub fn take_pending_redirect(&mut self, broker_id: &str) -> Option<String> {
        self.pending_redirects.remove(broker_id)
    }

    pub fn pending_redirects(&self) -> &BTreeMap<String, String> {
        &self.pending_redirects
    }

    /// Persist identifier-owned continuation data for a broker.
    pub fn put_flow_state<T: Serialize>(
        &mut self,
        broker_id: impl Into<String>,
        state: &T,
    ) -> IdentityResult<()> {
        let value = serde_json::to_value(state)?;
        self.flow_state.insert(broker_id.into(), value);
        Ok(())
    }

    /// Remove and return a broker's continuation data.
    pub fn take_flow_state<T: DeserializeOwned>(
        &mut self,
        broker_id: &str,
    ) -> IdentityResult<Option<T>> {
        match self.flow_state.remove(broker_id) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn has_flow_state(&self, broker_id: &str) -> bool {
        self.flow_state.contains_key(broker_id)
    }

    pub fn logout_chain(&self) -> Option<&LogoutChainState> {
        self.logout_chain.as_ref()
    }

    /// Start a logout chain, replacing any previous one and resetting the
    /// failure record.
    pub fn begin_logout_chain(&mut self, chain: LogoutChainState) {
        self.logout_failures.clear();
        self.logout_chain = Some(chain);
    }

    /// Pop the next broker id off the chain. Returns `None` when there is no
    /// chain or it is exhausted.
    pub fn next_logout_broker(&mut self) -> Option<String> {
        let chain = self.logout_chain.as_mut()?;
        chain.awaiting = None;
        chain.pop_next()
    }

    /// Mark the broker whose provider the browser is being sent to.
    pub fn await_logout_callback(&mut self, broker_id: impl Into<String>) {
        if let Some(chain) = self.logout_chain.as_mut() {
            chain.awaiting = Some(broker_id.into());
        }
    }

    /// Remove the chain and clear every identity. Returns the finished chain.
    pub fn finish_logout_chain(&mut self) -> Option<LogoutChainState> {
        let chain = self.logout_chain.take();
        self.invalidate_all();
        chain
    }

    pub fn record_logout_failure(&mut self, broker_id: impl Into<String>, reason: impl Into<String>) {
        self.logout_failures.push(LogoutFailure {
            broker_id: broker_id.into(),
            reason: reason.into(),
            at: Utc::now(),
        });
    }

    pub fn logout_failures(&self) -> &[LogoutFailure] {
        &self.logout_failures
    }
}
