//! Auth server
//!
//! Serves login, callback and logout routes for every configured broker.
//! Configuration comes from `config.toml` (or `RAS_AUTH_CONFIG_FILE`) and
//! `RAS_AUTH__*` environment variables; see [`ras_auth_server::config`].

use anyhow::{Context, Result};
use ras_auth_server::build_app;
use ras_auth_server::config::AppConfig;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_filter()).context("Invalid logging.level")?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.logging.target)
        .with_level(true);

    if config.logging.format.eq_ignore_ascii_case("compact") {
        builder.compact().init();
    } else {
        builder.pretty().init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config)?;

    // Broker configuration defects end the process here, before serving
    let app = build_app(&config)?;

    let sessions = app.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = sessions.cleanup_expired();
            if removed > 0 {
                debug!(removed, remaining = sessions.len(), "Expired sessions removed");
            }
        }
    });

    let addr = config.socket_addr();
    info!("Auth server listening on http://{}", addr);
    info!(
        "Login at {}{}/login/{{broker}}",
        config.auth.public_url.trim_end_matches('/'),
        config.mount_path()
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app.router).await?;

    Ok(())
}
