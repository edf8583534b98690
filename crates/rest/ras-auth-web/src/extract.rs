use crate::AuthState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;
use ras_identity_session::{IdentityService, SessionId};
use std::convert::Infallible;

/// The identities of the requesting browser session, for handlers outside
/// the auth routes. A request without a valid session cookie sees an empty
/// anonymous session.
pub struct CurrentIdentities(pub IdentityService);

impl FromRequestParts<AuthState> for CurrentIdentities {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session = state.session_from(&jar).unwrap_or_else(SessionId::generate);
        Ok(Self(state.identity_service(session)))
    }
}
