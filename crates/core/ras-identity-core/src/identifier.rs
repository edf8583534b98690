use crate::error::IdentityResult;
use crate::identity::Identity;
use crate::store::IdentityStore;
use async_trait::async_trait;
use std::collections::HashMap;
use url::Url;

/// Result of an authentication attempt against one broker.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// The principal is known; the caller stores it.
    Resolved(Identity),
    /// The browser must be sent to this URL; a later callback completes the flow.
    RedirectRequired(Url),
    /// Authentication failed. The reason is for logs, not for the end user.
    Denied(String),
}

impl AuthOutcome {
    pub fn denied(reason: impl Into<String>) -> Self {
        AuthOutcome::Denied(reason.into())
    }
}

/// Protocol-neutral view of an inbound auth request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Query and form parameters, merged.
    pub params: HashMap<String, String>,
    /// Where an external provider must send the browser back after login.
    pub callback_url: Url,
    /// Where an external provider must send the browser back after logout.
    pub logout_callback_url: Url,
}

impl AuthRequest {
    pub fn new(callback_url: Url, logout_callback_url: Url) -> Self {
        Self {
            params: HashMap::new(),
            callback_url,
            logout_callback_url,
        }
    }

    pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Authentication capability for one configured broker.
///
/// Built once per [`BrokerConfig`](crate::BrokerConfig) and shared by all
/// requests, so implementations must be safe for concurrent use. Any
/// per-session continuation data belongs in the [`IdentityStore`] handed to
/// each call, never in the identifier itself.
#[async_trait]
pub trait Identifier: Send + Sync {
    /// The configured broker id this identifier serves.
    fn broker_id(&self) -> &str;

    /// Start or perform authentication.
    async fn authenticate(&self, request: &AuthRequest, store: &mut IdentityStore)
    -> AuthOutcome;

    /// Complete a redirect-based flow started by [`Identifier::authenticate`].
    ///
    /// Must return the cached identity for this broker, without verifying
    /// again, when one is already present.
    async fn callback(&self, request: &AuthRequest, store: &mut IdentityStore) -> AuthOutcome;

    /// Provider logout address, or `None` when dropping the cached identity is
    /// all that logout takes.
    ///
    /// Called while the broker's identity is still readable from `store`.
    async fn logout_redirect_url(
        &self,
        request: &AuthRequest,
        store: &IdentityStore,
    ) -> IdentityResult<Option<Url>>;
}
