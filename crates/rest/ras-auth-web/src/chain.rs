//! Chained logout across every configured broker.
//!
//! Each broker whose provider must be told about the logout costs one browser
//! round trip; purely local brokers are handled within the same request. The
//! remaining broker ids live in the session, so any request holding the
//! session lock can pick up where the previous one left off.

use crate::AuthState;
use ras_identity_core::LogoutChainState;
use ras_identity_session::SessionGuard;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Start a logout of every configured broker, in configuration order.
pub(crate) fn begin(state: &AuthState, guard: &mut SessionGuard, final_redirect_url: String) {
    let chain = LogoutChainState::new(state.brokers.ids(), final_redirect_url);
    info!(
        session = %guard.session(),
        brokers = chain.remaining().count(),
        "Logout of all brokers started"
    );
    guard.begin_logout_chain(chain);
}

/// Work through the chain until a broker needs the browser or the chain is
/// done. Returns where to send the browser; the caller commits `guard`.
pub(crate) async fn advance(state: &AuthState, guard: &mut SessionGuard) -> String {
    loop {
        let Some(broker_id) = guard.next_logout_broker() else {
            return finish(state, guard);
        };

        let Some(identifier) = state.brokers.get(&broker_id).cloned() else {
            error!(session = %guard.session(), broker = %broker_id, "Logout chain names an unconfigured broker");
            guard.record_logout_failure(&broker_id, "broker is not configured");
            continue;
        };

        let request = state.auth_request(&broker_id, HashMap::new());
        // Asked before invalidating: the provider may need the identity's tokens
        let step = tokio::time::timeout(
            state.settings.logout_step_timeout,
            identifier.logout_redirect_url(&request, guard),
        )
        .await;
        guard.invalidate(&broker_id);

        match step {
            Ok(Ok(Some(url))) => {
                info!(session = %guard.session(), broker = %broker_id, "Sending browser to provider logout");
                guard.await_logout_callback(&broker_id);
                return url.to_string();
            }
            Ok(Ok(None)) => {
                info!(session = %guard.session(), broker = %broker_id, "Logged out locally");
            }
            Ok(Err(e)) => {
                warn!(session = %guard.session(), broker = %broker_id, "Provider logout failed: {}", e);
                guard.record_logout_failure(&broker_id, e.to_string());
            }
            Err(_) => {
                warn!(session = %guard.session(), broker = %broker_id, "Provider logout timed out");
                guard.record_logout_failure(&broker_id, "timed out");
            }
        }
    }
}

fn finish(state: &AuthState, guard: &mut SessionGuard) -> String {
    let target = guard
        .finish_logout_chain()
        .map(|chain| chain.final_redirect_url().to_string())
        .unwrap_or_else(|| state.settings.logged_out_url.clone());

    let failures = guard.logout_failures().len();
    if failures > 0 {
        warn!(session = %guard.session(), failures, "Logout of all brokers finished with failures");
    } else {
        info!(session = %guard.session(), "Logout of all brokers finished");
    }

    target
}

/// Resume after a provider sent the browser back to `logoutCallback`.
///
/// Returns `None` when there is nothing to resume: no chain, or the callback
/// names a broker other than the one the chain waits for (a stale or
/// duplicate delivery).
pub(crate) async fn resume(
    state: &AuthState,
    guard: &mut SessionGuard,
    params: &HashMap<String, String>,
) -> Option<String> {
    let awaiting = guard.logout_chain()?.awaiting().map(str::to_string);

    if let (Some(awaiting), Some(returned)) = (&awaiting, params.get("broker")) {
        if awaiting != returned {
            info!(
                session = %guard.session(),
                awaiting = %awaiting,
                returned = %returned,
                "Ignoring stale logout callback"
            );
            return None;
        }
    }

    if let (Some(awaiting), Some(reason)) = (&awaiting, params.get("error")) {
        warn!(session = %guard.session(), broker = %awaiting, "Provider reported logout error: {}", reason);
        guard.record_logout_failure(awaiting.as_str(), reason.as_str());
    }

    Some(advance(state, guard).await)
}
