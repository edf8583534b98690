//! Route handlers.

use crate::error::AuthWebError;
use crate::{AuthState, chain};
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum_extra::extract::cookie::CookieJar;
use ras_identity_core::{AuthOutcome, Identifier, Identity};
use ras_identity_session::{SessionGuard, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Parameter naming where to send the browser once the action completes.
const REDIRECT_PARAM: &str = "redirecturl";

type HandlerResult = Result<Response, AuthWebError>;

/// Routes relative to the mount path; nest the router there.
pub fn auth_router(state: AuthState) -> Router {
    let mut router = Router::new()
        .route("/login/{broker}", get(login).post(login))
        .route("/callback/{broker}", get(callback).post(callback))
        .route("/logout", get(logout_all).post(logout_all))
        .route("/logout/{broker}", get(logout).post(logout))
        .route("/logoutCallback", get(logout_callback));

    if state.settings.debug {
        router = router.route("/debug", get(debug));
    }

    router.with_state(state)
}

/// Query parameters merged with a form-encoded body; body values win.
fn merge_params(mut query: HashMap<String, String>, body: &Bytes) -> HashMap<String, String> {
    query.extend(url::form_urlencoded::parse(body).into_owned());
    query
}

fn find_broker(state: &AuthState, broker: &str) -> Result<Arc<dyn Identifier>, AuthWebError> {
    state.brokers.get(broker).cloned().ok_or_else(|| {
        info!(broker = %broker, "Request for unknown broker");
        AuthWebError::UnknownBroker(broker.to_string())
    })
}

fn store_identity(guard: &mut SessionGuard, broker: &str, identity: Identity) -> Result<(), AuthWebError> {
    if identity.broker_id != broker {
        return Err(AuthWebError::BrokerMismatch {
            expected: broker.to_string(),
            actual: identity.broker_id,
        });
    }

    info!(session = %guard.session(), broker = %broker, subject = %identity.subject, "Identity stored");
    guard.insert_identity(identity);
    Ok(())
}

fn redirect(target: &str) -> Response {
    Redirect::to(target).into_response()
}

async fn login(
    State(state): State<AuthState>,
    Path(broker): Path<String>,
    jar: CookieJar,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> (CookieJar, HandlerResult) {
    let (session, jar) = state.session_cookie(jar);
    let params = merge_params(query, &body);
    (jar, handle_login(&state, session, &broker, params).await)
}

async fn handle_login(
    state: &AuthState,
    session: SessionId,
    broker: &str,
    params: HashMap<String, String>,
) -> HandlerResult {
    let identifier = find_broker(state, broker)?;
    let target = state
        .settings
        .sanitize_redirect(params.get(REDIRECT_PARAM).map(String::as_str), &state.settings.default_landing);
    let request = state.auth_request(broker, params);

    let mut guard = state.sessions.lock(&session).await?;
    match identifier.authenticate(&request, &mut guard).await {
        AuthOutcome::Resolved(identity) => {
            store_identity(&mut guard, broker, identity)?;
            guard.commit().await?;
            Ok(redirect(&target))
        }
        AuthOutcome::RedirectRequired(url) => {
            guard.set_pending_redirect(broker, target);
            guard.commit().await?;
            Ok(redirect(url.as_str()))
        }
        AuthOutcome::Denied(reason) => {
            guard.commit().await?;
            warn!(session = %session, broker = %broker, "Login denied: {}", reason);
            Err(AuthWebError::AuthenticationFailed(reason))
        }
    }
}

async fn callback(
    State(state): State<AuthState>,
    Path(broker): Path<String>,
    jar: CookieJar,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> (CookieJar, HandlerResult) {
    let (session, jar) = state.session_cookie(jar);
    let params = merge_params(query, &body);
    (jar, handle_callback(&state, session, &broker, params).await)
}

async fn handle_callback(
    state: &AuthState,
    session: SessionId,
    broker: &str,
    params: HashMap<String, String>,
) -> HandlerResult {
    let identifier = find_broker(state, broker)?;
    let request = state.auth_request(broker, params);

    let mut guard = state.sessions.lock(&session).await?;
    match identifier.callback(&request, &mut guard).await {
        AuthOutcome::Resolved(identity) => {
            store_identity(&mut guard, broker, identity)?;
            let target = guard
                .take_pending_redirect(broker)
                .unwrap_or_else(|| state.settings.default_landing.clone());
            guard.commit().await?;
            Ok(redirect(&target))
        }
        AuthOutcome::RedirectRequired(url) => {
            guard.commit().await?;
            Ok(redirect(url.as_str()))
        }
        AuthOutcome::Denied(reason) => {
            // Commit anyway: the identifier may have consumed one-time flow state
            guard.commit().await?;
            warn!(session = %session, broker = %broker, "Callback denied: {}", reason);
            Err(AuthWebError::AuthenticationFailed(reason))
        }
    }
}

async fn logout(
    State(state): State<AuthState>,
    Path(broker): Path<String>,
    jar: CookieJar,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> (CookieJar, HandlerResult) {
    let (session, jar) = state.session_cookie(jar);
    let params = merge_params(query, &body);
    (jar, handle_logout(&state, session, &broker, params).await)
}

async fn handle_logout(
    state: &AuthState,
    session: SessionId,
    broker: &str,
    params: HashMap<String, String>,
) -> HandlerResult {
    let identifier = find_broker(state, broker)?;
    let target = state
        .settings
        .sanitize_redirect(params.get(REDIRECT_PARAM).map(String::as_str), &state.settings.logged_out_url);
    let request = state.auth_request(broker, params);

    // The provider only reads the identity, so it is asked without the session lock
    let store = state.sessions.snapshot(&session).await?;
    let provider_logout = tokio::time::timeout(
        state.settings.logout_step_timeout,
        identifier.logout_redirect_url(&request, &store),
    )
    .await;
    state.identity_service(session.clone()).invalidate(broker).await?;
    info!(session = %session, broker = %broker, "Logged out");

    match provider_logout {
        Ok(Ok(Some(url))) => Ok(redirect(url.as_str())),
        Ok(Ok(None)) => Ok(redirect(&target)),
        Ok(Err(e)) => {
            warn!(session = %session, broker = %broker, "Provider logout failed: {}", e);
            Ok(redirect(&target))
        }
        Err(_) => {
            warn!(session = %session, broker = %broker, "Provider logout timed out");
            Ok(redirect(&target))
        }
    }
}

async fn logout_all(
    State(state): State<AuthState>,
    jar: CookieJar,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> (CookieJar, HandlerResult) {
    let (session, jar) = state.session_cookie(jar);
    let params = merge_params(query, &body);
    (jar, handle_logout_all(&state, session, params).await)
}

async fn handle_logout_all(
    state: &AuthState,
    session: SessionId,
    params: HashMap<String, String>,
) -> HandlerResult {
    let final_redirect = state
        .settings
        .sanitize_redirect(params.get(REDIRECT_PARAM).map(String::as_str), &state.settings.logged_out_url);

    let mut guard = state.sessions.lock(&session).await?;
    chain::begin(state, &mut guard, final_redirect);
    let target = chain::advance(state, &mut guard).await;
    guard.commit().await?;

    Ok(redirect(&target))
}

async fn logout_callback(
    State(state): State<AuthState>,
    jar: CookieJar,
    Query(params): Query<HashMap<String, String>>,
) -> (CookieJar, HandlerResult) {
    let (session, jar) = state.session_cookie(jar);
    (jar, handle_logout_callback(&state, session, params).await)
}

async fn handle_logout_callback(
    state: &AuthState,
    session: SessionId,
    params: HashMap<String, String>,
) -> HandlerResult {
    let mut guard = state.sessions.lock(&session).await?;

    match chain::resume(state, &mut guard, &params).await {
        Some(target) => {
            guard.commit().await?;
            Ok(redirect(&target))
        }
        None => Ok(redirect(&state.settings.logged_out_url)),
    }
}

async fn debug(State(state): State<AuthState>, jar: CookieJar) -> (CookieJar, HandlerResult) {
    let (session, jar) = state.session_cookie(jar);
    (jar, handle_debug(&state, session).await)
}

async fn handle_debug(state: &AuthState, session: SessionId) -> HandlerResult {
    let service = state.identity_service(session.clone());
    let identities = service.identities().await?;
    let roles = service.roles().await?;
    let store = state.sessions.snapshot(&session).await?;

    // Claim names only; values may carry tokens
    let identities: Vec<serde_json::Value> = identities
        .iter()
        .map(|identity| {
            serde_json::json!({
                "broker_id": identity.broker_id,
                "subject": identity.subject,
                "claims": identity.claims.keys().collect::<Vec<_>>(),
                "issued_at": identity.issued_at,
                "expires_at": identity.expires_at,
            })
        })
        .collect();

    let logout_chain = store.logout_chain().map(|chain| {
        serde_json::json!({
            "remaining": chain.remaining().collect::<Vec<_>>(),
            "awaiting": chain.awaiting(),
            "final_redirect_url": chain.final_redirect_url(),
        })
    });

    Ok(Json(serde_json::json!({
        "session": session.as_str(),
        "brokers": state.brokers.ids().collect::<Vec<_>>(),
        "identities": identities,
        "roles": roles,
        "logout_chain": logout_chain,
        "pending_redirects": store.pending_redirects(),
        "logout_failures": store.logout_failures(),
    }))
    .into_response())
}
