//! The `oidc` broker.

use crate::client::OAuth2Client;
use crate::config::{OidcBrokerOptions, UserInfoMapping};
use crate::error::{OAuth2Error, OAuth2Result};
use crate::state::FlowStateStore;
use crate::types::{AuthorizationResponse, TokenResponse, UserClaims};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ras_identity_core::{
    AuthOutcome, AuthRequest, BoxError, BrokerConfig, Identifier, Identity, IdentityError,
    IdentityResult, IdentityStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Broker type name this crate registers under.
pub const BROKER_TYPE: &str = "oidc";

/// Claim holding the raw ID token, used as `id_token_hint` on logout.
const ID_TOKEN_CLAIM: &str = "id_token";

/// Request parameters forwarded from `login` to the authorization endpoint.
const FORWARDED_PARAMS: &[&str] = &["login_hint", "prompt"];

#[derive(Clone)]
pub struct OidcIdentifier {
    broker_id: String,
    client: OAuth2Client,
    callback_timeout: Duration,
}

impl OidcIdentifier {
    pub fn new(broker_id: impl Into<String>, options: OidcBrokerOptions) -> OAuth2Result<Self> {
        options.validate()?;
        // Token exchange plus userinfo, each bounded by the HTTP timeout
        let callback_timeout = Duration::from_secs(options.http_timeout_seconds.saturating_mul(2));

        Ok(Self {
            broker_id: broker_id.into(),
            client: OAuth2Client::new(options)?,
            callback_timeout,
        })
    }

    pub fn from_config(config: &BrokerConfig) -> OAuth2Result<Self> {
        Self::new(config.id.clone(), config.options_as()?)
    }

    /// Factory for the broker registry.
    pub fn factory(config: &BrokerConfig) -> Result<Option<Arc<dyn Identifier>>, BoxError> {
        let identifier = Self::from_config(config)?;
        Ok(Some(Arc::new(identifier)))
    }

    fn cached<'a>(&self, store: &'a IdentityStore) -> Option<&'a Identity> {
        store
            .identity(&self.broker_id)
            .filter(|identity| !identity.is_expired())
    }

    async fn complete(
        &self,
        request: &AuthRequest,
        store: &mut IdentityStore,
    ) -> OAuth2Result<Identity> {
        let response =
            AuthorizationResponse::from_params(|key| request.param(key).map(str::to_string));

        let mut flow = FlowStateStore::new(store, &self.broker_id);
        let tokens = self.client.handle_callback(&mut flow, response).await?;
        let user_info = self.client.get_user_info(&tokens).await?;

        Ok(self.map_user_info_to_identity(user_info, &tokens))
    }

    /// Every claim is carried over. A configured [`UserInfoMapping`] picks the
    /// subject and fills `email`, `name` and `picture` from provider-specific
    /// claims; a mapped claim that is missing or not a string changes nothing.
    fn map_user_info_to_identity(&self, user: UserClaims, tokens: &TokenResponse) -> Identity {
        let mapping = self.client.options().user_info_mapping.as_ref();
        let mapped = |field: Option<&String>| {
            field
                .and_then(|field| user.text(field))
                .map(String::from)
        };

        let subject = mapped(mapping.and_then(|m| m.subject_field.as_ref()))
            .unwrap_or_else(|| user.subject.clone());
        let standard: Vec<(&str, String)> = match mapping {
            Some(UserInfoMapping {
                email_field,
                name_field,
                picture_field,
                ..
            }) => [
                ("email", email_field),
                ("name", name_field),
                ("picture", picture_field),
            ]
            .into_iter()
            .filter_map(|(claim, field)| mapped(field.as_ref()).map(|value| (claim, value)))
            .collect(),
            None => Vec::new(),
        };

        let mut identity = Identity::new(&self.broker_id, subject);
        identity.claims = user.claims;
        for (claim, value) in standard {
            identity.claims.insert(claim.to_string(), value.into());
        }
        if let Some(id_token) = &tokens.id_token {
            identity
                .claims
                .insert(ID_TOKEN_CLAIM.to_string(), id_token.clone().into());
        }

        match tokens.expires_in.map(|seconds| (seconds, expiry_after(seconds))) {
            Some((_, Some(expires_at))) => identity.with_expiry(expires_at),
            Some((seconds, None)) => {
                warn!(
                    broker = %self.broker_id,
                    expires_in = seconds,
                    "Ignoring out-of-range token lifetime"
                );
                identity
            }
            None => identity,
        }
    }
}

/// `now + seconds`, or `None` when that is not a representable instant.
fn expiry_after(seconds: u64) -> Option<DateTime<Utc>> {
    i64::try_from(seconds)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
}

#[async_trait]
impl Identifier for OidcIdentifier {
    fn broker_id(&self) -> &str {
        &self.broker_id
    }

    async fn authenticate(&self, request: &AuthRequest, store: &mut IdentityStore) -> AuthOutcome {
        if let Some(identity) = self.cached(store) {
            return AuthOutcome::Resolved(identity.clone());
        }

        let forwarded: HashMap<String, String> = FORWARDED_PARAMS
            .iter()
            .filter_map(|key| request.param(key).map(|v| (key.to_string(), v.to_string())))
            .collect();

        let mut flow = FlowStateStore::new(store, &self.broker_id);
        match self.client.generate_authorization_url(
            &mut flow,
            request.callback_url.as_str(),
            &forwarded,
        ) {
            Ok(url) => {
                info!(broker = %self.broker_id, "Started authorization code flow");
                AuthOutcome::RedirectRequired(url)
            }
            Err(e) => {
                warn!(broker = %self.broker_id, "Could not start authorization: {}", e);
                AuthOutcome::Denied(e.to_string())
            }
        }
    }

    async fn callback(&self, request: &AuthRequest, store: &mut IdentityStore) -> AuthOutcome {
        // Duplicate delivery: the code was already redeemed
        if let Some(identity) = self.cached(store) {
            return AuthOutcome::Resolved(identity.clone());
        }

        let result = tokio::time::timeout(self.callback_timeout, self.complete(request, store))
            .await
            .unwrap_or(Err(OAuth2Error::Timeout));

        match result {
            Ok(identity) => {
                info!(broker = %self.broker_id, subject = %identity.subject, "Identity resolved");
                AuthOutcome::Resolved(identity)
            }
            Err(e) => {
                warn!(broker = %self.broker_id, "Callback rejected: {}", e);
                AuthOutcome::Denied(e.to_string())
            }
        }
    }

    async fn logout_redirect_url(
        &self,
        request: &AuthRequest,
        store: &IdentityStore,
    ) -> IdentityResult<Option<Url>> {
        // Nothing to end at the provider without a session there
        let Some(identity) = store.identity(&self.broker_id) else {
            return Ok(None);
        };

        let hint = identity.claim(ID_TOKEN_CLAIM).and_then(|value| value.as_str());
        self.client
            .end_session_url(&request.logout_callback_url, hint)
            .map_err(|e| IdentityError::ProviderError(e.to_string()))
    }
}
