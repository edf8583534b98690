//! HTTP face of the identity brokers.
//!
//! [`auth_router`] serves `login/{broker}`, `callback/{broker}`,
//! `logout/{broker}`, `logout` (every broker, chained), `logoutCallback` and,
//! when enabled, `debug`. Every step runs to completion within its request;
//! anything a later step needs is written to the browser's session before the
//! response goes out.

mod chain;
mod controller;
mod error;
mod extract;
mod session;
mod settings;

pub use controller::auth_router;
pub use error::AuthWebError;
pub use extract::CurrentIdentities;
pub use settings::{AuthSettings, DEFAULT_COOKIE_NAME, DEFAULT_MOUNT_PATH};

use ras_identity_core::{AuthRequest, Brokers};
use ras_identity_session::{IdentityService, SessionId, SessionManager};
use std::collections::HashMap;
use std::sync::Arc;

/// Shared state of the auth routes.
#[derive(Clone)]
pub struct AuthState {
    pub brokers: Arc<Brokers>,
    pub sessions: Arc<SessionManager>,
    pub settings: Arc<AuthSettings>,
}

impl AuthState {
    pub fn new(brokers: Brokers, sessions: Arc<SessionManager>, settings: AuthSettings) -> Self {
        Self {
            brokers: Arc::new(brokers),
            sessions,
            settings: Arc::new(settings),
        }
    }

    pub fn identity_service(&self, session: SessionId) -> IdentityService {
        IdentityService::new(session, self.sessions.clone(), self.brokers.clone())
    }

    pub(crate) fn auth_request(&self, broker_id: &str, params: HashMap<String, String>) -> AuthRequest {
        AuthRequest::new(
            self.settings.callback_url(broker_id),
            self.settings.logout_callback_url(broker_id),
        )
        .with_params(params)
    }
}
