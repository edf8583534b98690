//! `oidc` broker options.

use crate::error::{OAuth2Error, OAuth2Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string()]
}

fn default_use_pkce() -> bool {
    true
}

fn default_state_ttl_seconds() -> u64 {
    600
}

fn default_http_timeout_seconds() -> u64 {
    10
}

/// A pending authorization older than a day is abandoned.
pub const MAX_STATE_TTL_SECONDS: u64 = 86_400;
pub const MAX_HTTP_TIMEOUT_SECONDS: u64 = 300;

/// Options block of a broker config with `type = "oidc"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcBrokerOptions {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    /// When absent, claims are read from the ID token returned by the token
    /// endpoint.
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    /// RP-initiated logout endpoint. Without it logout is local only.
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Additional parameters to include in authorization request
    #[serde(default)]
    pub auth_params: HashMap<String, String>,
    #[serde(default = "default_use_pkce")]
    pub use_pkce: bool,
    #[serde(default = "default_state_ttl_seconds")]
    pub state_ttl_seconds: u64,
    /// Upper bound for every call to the provider.
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default)]
    pub user_info_mapping: Option<UserInfoMapping>,
}

impl OidcBrokerOptions {
    pub fn validate(&self) -> OAuth2Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(OAuth2Error::Config("client_id cannot be empty".to_string()));
        }

        let endpoints = [
            ("authorization_endpoint", Some(&self.authorization_endpoint)),
            ("token_endpoint", Some(&self.token_endpoint)),
            ("userinfo_endpoint", self.userinfo_endpoint.as_ref()),
            ("end_session_endpoint", self.end_session_endpoint.as_ref()),
        ];
        for (name, endpoint) in endpoints {
            if let Some(endpoint) = endpoint {
                Url::parse(endpoint)
                    .map_err(|e| OAuth2Error::Config(format!("{}: {}", name, e)))?;
            }
        }

        if !(1..=MAX_STATE_TTL_SECONDS).contains(&self.state_ttl_seconds) {
            return Err(OAuth2Error::Config(format!(
                "state_ttl_seconds must be between 1 and {}",
                MAX_STATE_TTL_SECONDS
            )));
        }
        if !(1..=MAX_HTTP_TIMEOUT_SECONDS).contains(&self.http_timeout_seconds) {
            return Err(OAuth2Error::Config(format!(
                "http_timeout_seconds must be between 1 and {}",
                MAX_HTTP_TIMEOUT_SECONDS
            )));
        }

        Ok(())
    }
}

/// Mapping configuration for user info fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoMapping {
    #[serde(default)]
    pub subject_field: Option<String>,
    #[serde(default)]
    pub email_field: Option<String>,
    #[serde(default)]
    pub name_field: Option<String>,
    #[serde(default)]
    pub picture_field: Option<String>,
}

impl Default for UserInfoMapping {
    fn default() -> Self {
        Self {
            subject_field: Some("sub".to_string()),
            email_field: Some("email".to_string()),
            name_field: Some("name".to_string()),
            picture_field: Some("picture".to_string()),
        }
    }
}
