//! What the provider sends back, reduced to what the broker reads.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters the provider sends back to the callback address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl AuthorizationResponse {
    pub fn from_params(param: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            code: param("code"),
            state: param("state"),
            error: param("error"),
            error_description: param("error_description"),
        }
    }
}

/// Token endpoint answer. `token_type`, `scope` and refresh tokens are ignored:
/// the access token is only ever presented to the userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Kept on the identity as the `id_token_hint` for logout.
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Claims about the signed-in user, from the userinfo endpoint or an ID token.
///
/// Plain OAuth2 providers name the subject `id` and often send it as a number.
#[derive(Debug, Clone, Deserialize)]
pub struct UserClaims {
    #[serde(rename = "sub", alias = "id", deserialize_with = "subject_from_value")]
    pub subject: String,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl UserClaims {
    /// A string claim by name.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}

fn subject_from_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(subject) if !subject.is_empty() => Ok(subject),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(de::Error::custom(format!("unusable subject: {}", other))),
    }
}
