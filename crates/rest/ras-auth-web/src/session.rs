//! Browser session cookie.

use crate::AuthState;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use ras_identity_session::SessionId;
use tracing::debug;

impl AuthState {
    /// The session named by the request's cookie, if it is well formed.
    pub fn session_from(&self, jar: &CookieJar) -> Option<SessionId> {
        jar.get(&self.settings.cookie_name)
            .and_then(|cookie| SessionId::parse(cookie.value()))
    }

    /// The request's session, or a new one with its cookie added to `jar`.
    pub(crate) fn session_cookie(&self, jar: CookieJar) -> (SessionId, CookieJar) {
        if let Some(session) = self.session_from(&jar) {
            return (session, jar);
        }

        let session = SessionId::generate();
        debug!(session = %session, "Starting browser session");

        let cookie = Cookie::build((self.settings.cookie_name.clone(), session.to_string()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.settings.secure_cookie);

        (session, jar.add(cookie))
    }
}
