//! Failures of the `oidc` broker.
//!
//! Startup problems come out of [`OidcIdentifier::new`](crate::OidcIdentifier::new);
//! everything else ends a login attempt and its message becomes the denial reason.

use thiserror::Error;

pub type OAuth2Result<T> = Result<T, OAuth2Error>;

#[derive(Debug, Error)]
pub enum OAuth2Error {
    #[error("invalid oidc options: {0}")]
    Config(String),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Store(#[from] ras_identity_core::IdentityError),

    #[error("could not reach the provider: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider did not answer in time")]
    Timeout,

    /// The provider came back with `error=...` instead of a code.
    #[error("provider refused authorization: {0}")]
    Refused(String),

    #[error("state does not match the pending authorization")]
    StateMismatch,

    #[error("no pending authorization, or it expired")]
    NoPendingAuthorization,

    #[error("callback carries no authorization code")]
    MissingCode,

    #[error("token endpoint rejected the code: {0}")]
    TokenRejected(String),

    #[error("malformed token response: {0}")]
    MalformedTokens(String),

    #[error("userinfo endpoint failed: {0}")]
    UserInfoRejected(String),

    #[error("malformed user claims: {0}")]
    MalformedClaims(String),
}

impl OAuth2Error {
    /// Collapse reqwest's own timeout into [`OAuth2Error::Timeout`].
    pub(crate) fn from_http(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            OAuth2Error::Timeout
        } else {
            OAuth2Error::Http(error)
        }
    }
}
