//! OpenID Connect identity broker.
//!
//! Implements the Authorization Code flow with PKCE as an
//! [`Identifier`](ras_identity_core::Identifier) of broker type `oidc`.
//! `authenticate` answers with a redirect to the provider, `callback` verifies
//! the returned `state`, exchanges the code and resolves the user, and logout
//! uses the provider's `end_session_endpoint` when one is configured.
//!
//! All per-session continuation data (the `state` parameter and the PKCE code
//! verifier) lives in the session's
//! [`IdentityStore`](ras_identity_core::IdentityStore), so a single
//! [`OidcIdentifier`] serves every session concurrently.

mod client;
mod config;
mod error;
mod provider;
mod state;
mod types;


pub use client::{OAuth2Client, PkceChallenge};
pub use config::{OidcBrokerOptions, UserInfoMapping};
pub use error::{OAuth2Error, OAuth2Result};
pub use provider::{BROKER_TYPE, OidcIdentifier};
pub use state::{FlowStateStore, OAuth2State};
pub use types::{AuthorizationResponse, TokenResponse, UserClaims};
