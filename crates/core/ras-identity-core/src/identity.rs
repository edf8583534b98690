use crate::error::{IdentityError, IdentityResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A principal resolved by one broker for the current session.
///
/// Identities are never mutated once stored; re-authentication replaces the
/// cached value wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub broker_id: String,
    pub subject: String,
    #[serde(default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(broker_id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            broker_id: broker_id.into(),
            subject: subject.into(),
            claims: serde_json::Map::new(),
            issued_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn claim(&self, key: &str) -> Option<&serde_json::Value> {
        self.claims.get(key)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// One configured broker: a stable id, the broker type selecting its factory,
/// and type-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(alias = "broker")]
    pub id: String,
    #[serde(rename = "type", alias = "typ")]
    pub broker_type: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl BrokerConfig {
    pub fn new(id: impl Into<String>, broker_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            broker_type: broker_type.into(),
            options: serde_json::Map::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Deserialize the options mapping into a broker-specific options type.
    pub fn options_as<T: DeserializeOwned>(&self) -> IdentityResult<T> {
        serde_json::from_value(serde_json::Value::Object(self.options.clone())).map_err(|e| {
            IdentityError::InvalidOptions(format!("broker '{}': {}", self.id, e))
        })
    }
}
