//! Auth server assembly.
//!
//! Builds the broker set from configuration (any defect there stops startup),
//! wires the session store and mounts the auth routes. `main` only adds
//! logging and the listener.

pub mod config;

use crate::config::AppConfig;
use anyhow::{Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use ras_auth_web::{AuthSettings, AuthState, AuthWebError, CurrentIdentities, auth_router};
use ras_identity_core::BrokerRegistry;
use ras_identity_local::PasswordIdentifier;
use ras_identity_oauth2::OidcIdentifier;
use ras_identity_session::{InMemorySessionBackend, SessionManager};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Every broker type this server can run.
pub fn registry() -> BrokerRegistry {
    BrokerRegistry::new()
        .register(ras_identity_local::BROKER_TYPE, PasswordIdentifier::factory)
        .register(ras_identity_oauth2::BROKER_TYPE, OidcIdentifier::factory)
}

pub struct App {
    pub router: Router,
    /// Kept for periodic expiry of idle sessions.
    pub sessions: Arc<InMemorySessionBackend>,
}

pub fn build_app(config: &AppConfig) -> Result<App> {
    let brokers = registry()
        .build(&config.brokers)
        .context("Invalid broker configuration")?;

    let settings = auth_settings(config)?;
    let mount_path = settings.mount_path.clone();

    let ttl_seconds = i64::try_from(config.auth.session_ttl_seconds)
        .context("auth.session_ttl_seconds is too large")?;
    let ttl = chrono::Duration::seconds(ttl_seconds);
    let backend = Arc::new(InMemorySessionBackend::with_ttl(ttl));
    let sessions = Arc::new(SessionManager::new(backend.clone()));

    info!(
        brokers = ?brokers.ids().collect::<Vec<_>>(),
        mount_path = %mount_path,
        debug = settings.debug,
        "Auth routes configured"
    );

    let state = AuthState::new(brokers, sessions, settings);
    let router = Router::new()
        .route("/", get(landing))
        .with_state(state.clone())
        .nest(&mount_path, auth_router(state))
        .layer(TraceLayer::new_for_http());

    Ok(App {
        router,
        sessions: backend,
    })
}

fn auth_settings(config: &AppConfig) -> Result<AuthSettings> {
    let mut settings = AuthSettings::new(config.public_url()?)
        .context("auth.public_url cannot serve as a base URL")?
        .with_mount_path(config.mount_path())
        .with_debug(config.auth.debug)
        .with_logout_step_timeout(Duration::from_secs(config.auth.logout_step_timeout_seconds));

    settings.default_landing = config.auth.default_landing.clone();
    settings.logged_out_url = config.auth.logged_out_url.clone();
    settings.cookie_name = config.auth.cookie_name.clone();
    settings.secure_cookie = config.auth.secure_cookie;

    Ok(settings)
}

/// Who the browser is signed in as, per broker.
async fn landing(
    CurrentIdentities(service): CurrentIdentities,
) -> Result<Json<Value>, AuthWebError> {
    let identities: Vec<Value> = service
        .identities()
        .await?
        .into_iter()
        .map(|identity| json!({ "broker": identity.broker_id, "subject": identity.subject }))
        .collect();
    let roles = service.roles().await?;

    Ok(Json(json!({
        "identities": identities,
        "roles": roles,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use ras_identity_core::BrokerConfig;
    use tower::ServiceExt;

    fn config() -> AppConfig {
        AppConfig {
            brokers: vec![BrokerConfig::new("local", "password").with_option(
                "users",
                json!([{ "username": "alice", "password": "wonderland" }]),
            )],
            ..AppConfig::default()
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_unknown_broker_type_stops_startup() {
        let mut config = config();
        config.brokers.push(BrokerConfig::new("ldap", "kerberos"));

        let err = build_app(&config).err().unwrap();
        let message = format!("{:#}", err);
        assert!(message.contains("ldap"));
        assert!(message.contains("kerberos"));
    }

    #[test]
    fn test_invalid_broker_options_stop_startup() {
        let mut config = config();
        config
            .brokers
            .push(BrokerConfig::new("sso", "oidc").with_option("client_id", "app"));

        let err = build_app(&config).err().unwrap();
        assert!(format!("{:#}", err).contains("sso"));
    }

    #[tokio::test]
    async fn test_landing_shows_anonymous_session() {
        let app = build_app(&config()).unwrap();

        let response = app
            .router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["identities"], json!([]));
        assert_eq!(body["roles"], json!([]));
    }

    #[tokio::test]
    async fn test_login_through_mounted_routes() {
        let app = build_app(&config()).unwrap();

        let response = app
            .router
            .clone()
            .oneshot(
                Request::post("/core/auth/login/local?redirecturl=/home")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("username=alice&password=wonderland"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/home");
        let cookie = response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        assert_eq!(app.sessions.len(), 1);

        let response = app
            .router
            .oneshot(
                Request::get("/")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["identities"], json!([{ "broker": "local", "subject": "alice" }]));
        assert_eq!(body["roles"], json!(["user"]));
    }

    #[tokio::test]
    async fn test_debug_route_follows_config() {
        let app = build_app(&config()).unwrap();
        let response = app
            .router
            .oneshot(Request::get("/core/auth/debug").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let mut config = config();
        config.auth.debug = true;
        let app = build_app(&config).unwrap();
        let response = app
            .router
            .oneshot(Request::get("/core/auth/debug").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
