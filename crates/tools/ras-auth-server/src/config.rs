//! Configuration for the auth server
//!
//! Sources, later ones winning:
//! - Defaults
//! - Configuration file (`RAS_AUTH_CONFIG_FILE`, default `config.toml`, optional)
//! - Environment variables with the `RAS_AUTH__` prefix, e.g. `RAS_AUTH__SERVER__PORT`
//! - `HOST` and `PORT`, when loaded through [`AppConfig::load`]

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use ras_auth_web::{DEFAULT_COOKIE_NAME, DEFAULT_MOUNT_PATH};
use ras_identity_core::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

/// Main configuration struct for the auth server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,

    pub auth: AuthConfig,

    /// Configured brokers, in the order logout-all visits them
    pub brokers: Vec<BrokerConfig>,

    pub logging: LoggingConfig,
}

/// Server network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    pub host: IpAddr,

    /// Port to bind to (default: 3000)
    pub port: u16,
}

/// Auth controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Externally visible base URL; provider callbacks are addressed to it
    pub public_url: String,

    /// Where the auth routes are mounted (default: /core/auth)
    pub mount_path: String,

    /// Post-login redirect when the request names none
    pub default_landing: String,

    /// Post-logout redirect when the request names none
    pub logged_out_url: String,

    pub cookie_name: String,

    /// Mark the session cookie `Secure`; required behind https
    pub secure_cookie: bool,

    /// Serve the debug route. Never enable in production.
    pub debug: bool,

    /// Idle lifetime of a browser session (default: 86400 = 24 hours)
    pub session_ttl_seconds: u64,

    /// Bound on one broker's step of a logout (default: 10)
    pub logout_step_timeout_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    pub level: String,

    /// Log format (pretty, compact)
    pub format: String,

    /// Whether to include the target module
    pub target: bool,
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    3000
}

fn default_public_url() -> String {
    "http://127.0.0.1:3000/".to_string()
}

fn default_session_ttl() -> u64 {
    86400
}

fn default_logout_step_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_url: default_public_url(),
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            default_landing: "/".to_string(),
            logged_out_url: "/".to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            secure_cookie: false,
            debug: false,
            session_ttl_seconds: default_session_ttl(),
            logout_step_timeout_seconds: default_logout_step_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 2] = ["pretty", "compact"];

impl AppConfig {
    /// Load configuration from the environment and the optional config file
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("RAS_AUTH_CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        let mut settings = Self::read(Path::new(&config_path))?;
        settings.apply_env_overrides()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Load configuration with `path` as the config file, without the `HOST`
    /// and `PORT` overrides. A missing file means defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = Self::read(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn read(path: &Path) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if path.exists() {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        } else {
            debug!("No config file found at {}, using defaults", path.display());
        }

        builder = builder.add_source(
            Environment::with_prefix("RAS_AUTH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("HOST") {
            info!("Using HOST environment variable");
            self.server.host = host.parse().context("Invalid HOST value")?;
        }

        if let Ok(port) = std::env::var("PORT") {
            info!("Using PORT environment variable");
            self.server.port = port.parse().context("Invalid PORT value")?;
        }

        Ok(())
    }

    /// Reject configurations the server must not start with
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        let public_url = self.public_url()?;
        if !matches!(public_url.scheme(), "http" | "https") {
            anyhow::bail!("auth.public_url must be an http(s) URL, got '{}'", public_url);
        }

        if !self.auth.mount_path.starts_with('/') || self.mount_path().is_empty() {
            anyhow::bail!(
                "auth.mount_path must start with '/' and name a path below the root, got '{}'",
                self.auth.mount_path
            );
        }

        if self.auth.cookie_name.is_empty() {
            anyhow::bail!("auth.cookie_name cannot be empty");
        }

        if self.auth.session_ttl_seconds == 0 {
            anyhow::bail!("auth.session_ttl_seconds must be positive");
        }

        if self.auth.logout_step_timeout_seconds == 0 {
            anyhow::bail!("auth.logout_step_timeout_seconds must be positive");
        }

        if self.brokers.is_empty() {
            anyhow::bail!("At least one broker must be configured");
        }

        let mut seen = HashSet::new();
        for broker in &self.brokers {
            if broker.id.is_empty() {
                anyhow::bail!("Broker id cannot be empty (type '{}')", broker.broker_type);
            }
            if !seen.insert(broker.id.as_str()) {
                anyhow::bail!("Broker '{}' is configured more than once", broker.id);
            }
        }

        // A full filter directive is checked when the subscriber parses it
        let level_lower = self.logging.level.to_lowercase();
        if !self.is_filter_directive() && !VALID_LEVELS.contains(&level_lower.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.logging.level,
                VALID_LEVELS
            );
        }

        let format_lower = self.logging.format.to_lowercase();
        if !VALID_FORMATS.contains(&format_lower.as_str()) {
            anyhow::bail!(
                "Invalid log format '{}'. Must be one of: {:?}",
                self.logging.format,
                VALID_FORMATS
            );
        }

        Ok(())
    }

    pub fn public_url(&self) -> Result<Url> {
        Url::parse(&self.auth.public_url)
            .with_context(|| format!("Invalid auth.public_url '{}'", self.auth.public_url))
    }

    /// The mount path without its trailing slash
    pub fn mount_path(&self) -> &str {
        self.auth.mount_path.trim_end_matches('/')
    }

    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from((self.server.host, self.server.port))
    }

    fn is_filter_directive(&self) -> bool {
        self.logging.level.contains('=') || self.logging.level.contains(',')
    }

    /// Get the log filter string for tracing
    pub fn log_filter(&self) -> String {
        if self.is_filter_directive() {
            self.logging.level.clone()
        } else {
            let level = self.logging.level.to_lowercase();
            format!(
                "ras_auth_server={level},ras_auth_web={level},ras_identity_core={level},\
                 ras_identity_session={level},ras_identity_local={level},\
                 ras_identity_oauth2={level},tower_http=info,warn"
            )
        }
    }
}
