//! Session-scoped identity storage.
//!
//! Every browser session owns one [`IdentityStore`](ras_identity_core::IdentityStore),
//! persisted through a [`SessionBackend`]. Read-modify-write access goes through
//! [`SessionManager::lock`], which serializes concurrent requests of the same
//! session (parallel tabs) without holding anything across requests.
//! [`IdentityService`] is the request-scoped facade other handlers use to ask
//! "who is the current user for broker X".

mod backend;
mod manager;
mod service;

pub use backend::{InMemorySessionBackend, SessionBackend};
pub use manager::{SessionGuard, SessionManager};
pub use service::{IdentityService, ROLE_USER};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque browser session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts only well-formed ids, so arbitrary cookie values never reach
    /// the backend.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(|uuid| Self(uuid.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(id.as_str()), Some(id));
        assert!(SessionId::parse("").is_none());
        assert!(SessionId::parse("../../etc/passwd").is_none());
    }
}
