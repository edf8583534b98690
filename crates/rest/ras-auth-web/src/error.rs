use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use ras_identity_core::IdentityError;
use thiserror::Error;
use tracing::error;

/// Request-time failures. None of these outlive the request that raised it.
#[derive(Debug, Error)]
pub enum AuthWebError {
    #[error("unknown identity provider '{0}'")]
    UnknownBroker(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("session store failure: {0}")]
    Session(#[from] IdentityError),

    #[error("broker '{expected}' returned an identity for '{actual}'")]
    BrokerMismatch { expected: String, actual: String },
}

impl AuthWebError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthWebError::UnknownBroker(_) => StatusCode::NOT_FOUND,
            AuthWebError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            AuthWebError::Session(_) | AuthWebError::BrokerMismatch { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// What the browser is told. Reasons and internals stay in the logs.
    fn public_message(&self) -> &'static str {
        match self {
            AuthWebError::UnknownBroker(_) => "Unknown identity provider.",
            AuthWebError::AuthenticationFailed(_) => "Authentication failed.",
            AuthWebError::Session(_) | AuthWebError::BrokerMismatch { .. } => {
                "Something went wrong while signing you in. Please try again."
            }
        }
    }
}

impl IntoResponse for AuthWebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Auth request failed: {}", self);
        }

        let page = format!(
            "<!doctype html><html><head><title>{title}</title></head>\
             <body><h1>{title}</h1><p>{message}</p></body></html>",
            title = status.canonical_reason().unwrap_or("Error"),
            message = self.public_message(),
        );

        (status, Html(page)).into_response()
    }
}
