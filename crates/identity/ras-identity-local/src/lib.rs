//! Password broker: identifies users against a local username/password table.
//!
//! Credentials arrive as `username`/`password` request parameters. Logout is
//! purely local, so [`Identifier::logout_redirect_url`] never yields a URL.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand_core::OsRng;
use ras_identity_core::{
    AuthOutcome, AuthRequest, BoxError, BrokerConfig, Identifier, Identity, IdentityError,
    IdentityResult, IdentityStore,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use url::Url;

/// Broker type name this crate registers under.
pub const BROKER_TYPE: &str = "password";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUser {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// A user entry in the broker options. Exactly one of `password` and
/// `password_hash` (an Argon2 PHC string) must be set.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalUserOptions {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordBrokerOptions {
    #[serde(default)]
    pub users: Vec<LocalUserOptions>,
    /// Lifetime of a resolved identity; unlimited when absent.
    #[serde(default)]
    pub identity_ttl_seconds: Option<i64>,
}

/// The user table is fixed by [`PasswordIdentifier::from_config`]; clones share it.
#[derive(Clone)]
pub struct PasswordIdentifier {
    broker_id: String,
    users: Arc<HashMap<String, LocalUser>>,
    semaphore: Arc<Semaphore>,
    identity_ttl: Option<Duration>,
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

impl PasswordIdentifier {
    fn with_users(broker_id: impl Into<String>, users: HashMap<String, LocalUser>) -> Self {
        Self {
            broker_id: broker_id.into(),
            users: Arc::new(users),
            semaphore: Arc::new(Semaphore::new(5)),
            identity_ttl: None,
        }
    }

    pub fn with_identity_ttl(mut self, ttl: Duration) -> Self {
        self.identity_ttl = Some(ttl);
        self
    }

    /// Build from a broker config. Plaintext passwords are hashed here, once.
    pub fn from_config(config: &BrokerConfig) -> IdentityResult<Self> {
        let options: PasswordBrokerOptions = config.options_as()?;
        let mut users = HashMap::with_capacity(options.users.len());

        for entry in options.users {
            if entry.username.is_empty() {
                return Err(IdentityError::InvalidOptions(
                    "username cannot be empty".to_string(),
                ));
            }

            let password_hash = match (entry.password, entry.password_hash) {
                (Some(password), None) => hash_password(&password)
                    .map_err(|e| IdentityError::InvalidOptions(e.to_string()))?,
                (None, Some(hash)) => {
                    PasswordHash::new(&hash).map_err(|e| {
                        IdentityError::InvalidOptions(format!(
                            "user '{}': invalid password_hash: {}",
                            entry.username, e
                        ))
                    })?;
                    hash
                }
                _ => {
                    return Err(IdentityError::InvalidOptions(format!(
                        "user '{}': set exactly one of password and password_hash",
                        entry.username
                    )));
                }
            };

            let user = LocalUser {
                username: entry.username.clone(),
                password_hash,
                email: entry.email,
                display_name: entry.display_name,
                claims: entry.claims,
            };
            if users.insert(entry.username.clone(), user).is_some() {
                return Err(IdentityError::InvalidOptions(format!(
                    "user '{}' is listed more than once",
                    entry.username
                )));
            }
        }

        let mut identifier = Self::with_users(config.id.clone(), users);
        if let Some(seconds) = options.identity_ttl_seconds {
            if seconds <= 0 {
                return Err(IdentityError::InvalidOptions(
                    "identity_ttl_seconds must be positive".to_string(),
                ));
            }
            identifier = identifier.with_identity_ttl(Duration::seconds(seconds));
        }

        Ok(identifier)
    }

    /// Factory for the broker registry.
    pub fn factory(config: &BrokerConfig) -> Result<Option<Arc<dyn Identifier>>, BoxError> {
        let identifier = Self::from_config(config)?;
        Ok(Some(Arc::new(identifier)))
    }

    async fn verify_user(&self, username: &str, password: &str) -> IdentityResult<LocalUser> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| IdentityError::ProviderError(e.to_string()))?;

        // Real Argon2 hash, verified for unknown users so both failure paths cost the same
        const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$9QsJRKgzJkKaOUvlp7gl2Q$qmE3qIFBNJ6nZYbLYXEI2uo0zZc7T0Q8LU1ZsqsZ3QE";

        let user = self.users.get(username);
        let password_hash = user.map_or(DUMMY_HASH, |user| user.password_hash.as_str());

        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| IdentityError::ProviderError(e.to_string()))?;

        let password_valid = Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok();

        match user {
            Some(user) if password_valid => Ok(user.clone()),
            _ => Err(IdentityError::InvalidCredentials),
        }
    }

    fn identity_for(&self, user: LocalUser) -> Identity {
        let mut identity = Identity::new(&self.broker_id, user.username);
        identity.claims = user.claims;
        if let Some(email) = user.email {
            identity.claims.insert("email".to_string(), email.into());
        }
        if let Some(name) = user.display_name {
            identity.claims.insert("name".to_string(), name.into());
        }
        match self.identity_ttl {
            Some(ttl) => identity.with_expiry(Utc::now() + ttl),
            None => identity,
        }
    }
}

#[async_trait]
impl Identifier for PasswordIdentifier {
    fn broker_id(&self) -> &str {
        &self.broker_id
    }

    async fn authenticate(
        &self,
        request: &AuthRequest,
        _store: &mut IdentityStore,
    ) -> AuthOutcome {
        let (Some(username), Some(password)) = (request.param("username"), request.param("password"))
        else {
            return AuthOutcome::denied("missing credentials");
        };

        match self.verify_user(username, password).await {
            Ok(user) => {
                info!(broker = %self.broker_id, subject = %user.username, "Password verified");
                AuthOutcome::Resolved(self.identity_for(user))
            }
            Err(e) => {
                debug!(broker = %self.broker_id, "Password verification failed: {}", e);
                AuthOutcome::Denied(e.to_string())
            }
        }
    }

    async fn callback(&self, request: &AuthRequest, store: &mut IdentityStore) -> AuthOutcome {
        if let Some(identity) = store
            .identity(&self.broker_id)
            .filter(|identity| !identity.is_expired())
        {
            return AuthOutcome::Resolved(identity.clone());
        }

        // No redirect leg: a credential post to the callback is a plain login
        self.authenticate(request, store).await
    }

    async fn logout_redirect_url(
        &self,
        _request: &AuthRequest,
        _store: &IdentityStore,
    ) -> IdentityResult<Option<Url>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(params: &[(&str, &str)]) -> AuthRequest {
        let mut request = AuthRequest::new(
            Url::parse("http://localhost:3000/core/auth/callback/local").unwrap(),
            Url::parse("http://localhost:3000/core/auth/logoutCallback?broker=local").unwrap(),
        );
        for (key, value) in params {
            request = request.with_param(*key, *value);
        }
        request
    }

    async fn authenticate(provider: &PasswordIdentifier, params: &[(&str, &str)]) -> AuthOutcome {
        let mut store = IdentityStore::new();
        provider.authenticate(&request(params), &mut store).await
    }

    fn provider_with_users(users: serde_json::Value) -> PasswordIdentifier {
        let config = BrokerConfig::new("local", BROKER_TYPE).with_option("users", users);
        PasswordIdentifier::from_config(&config).unwrap()
    }

    fn setup_test_provider() -> PasswordIdentifier {
        provider_with_users(serde_json::json!([
            {
                "username": "testuser",
                "password": "password123",
                "email": "test@example.com",
                "display_name": "Test User"
            },
            {
                "username": "alice",
                "password": "supersecret",
                "email": "alice@example.com",
                "display_name": "Alice Smith"
            }
        ]))
    }

    #[tokio::test]
    async fn test_basic_authentication_success() {
        let provider = setup_test_provider();

        let outcome =
            authenticate(&provider, &[("username", "testuser"), ("password", "password123")]).await;

        let AuthOutcome::Resolved(identity) = outcome else {
            panic!("Expected Resolved, got: {:?}", outcome);
        };
        assert_eq!(identity.broker_id, "local");
        assert_eq!(identity.subject, "testuser");
        assert_eq!(identity.claim("email").unwrap(), "test@example.com");
        assert_eq!(identity.claim("name").unwrap(), "Test User");
        assert!(identity.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_denied() {
        let provider = setup_test_provider();

        let outcome =
            authenticate(&provider, &[("username", "testuser"), ("password", "wrongpassword")])
                .await;

        match outcome {
            AuthOutcome::Denied(reason) => {
                assert_eq!(reason, IdentityError::InvalidCredentials.to_string())
            }
            other => panic!("Expected Denied, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_username_enumeration_prevention() {
        let provider = setup_test_provider();

        let unknown_user =
            authenticate(&provider, &[("username", "nonexistentuser"), ("password", "anypassword")])
                .await;
        let wrong_password =
            authenticate(&provider, &[("username", "testuser"), ("password", "wrongpassword")])
                .await;

        assert!(matches!(unknown_user, AuthOutcome::Denied(_)));
        assert_eq!(unknown_user, wrong_password);
    }

    #[tokio::test]
    async fn test_missing_credentials_denied() {
        let provider = setup_test_provider();

        for params in [
            vec![("password", "password123")],
            vec![("username", "testuser")],
            vec![("user", "testuser"), ("pass", "password123")],
            vec![],
        ] {
            let outcome = authenticate(&provider, &params).await;
            assert_eq!(outcome, AuthOutcome::denied("missing credentials"));
        }
    }

    #[tokio::test]
    async fn test_empty_and_oversized_credentials() {
        let provider = setup_test_provider();
        let long_username = "a".repeat(10000);
        let long_password = "b".repeat(10000);

        for (username, password) in [
            ("", "password123"),
            ("testuser", ""),
            ("", ""),
            (long_username.as_str(), "password123"),
            ("testuser", long_password.as_str()),
        ] {
            let outcome =
                authenticate(&provider, &[("username", username), ("password", password)]).await;
            assert!(
                matches!(outcome, AuthOutcome::Denied(_)),
                "Expected Denied for username of length {}",
                username.len()
            );
        }
    }

    #[tokio::test]
    async fn test_special_characters_in_credentials() {
        let provider = provider_with_users(serde_json::json!([
            { "username": "user@domain.com", "password": "p@ssw0rd!#$%" }
        ]));

        let outcome = authenticate(
            &provider,
            &[("username", "user@domain.com"), ("password", "p@ssw0rd!#$%")],
        )
        .await;
        assert!(matches!(outcome, AuthOutcome::Resolved(_)));

        let outcome = authenticate(
            &provider,
            &[
                ("username", "user@domain.com'; DROP TABLE users; --"),
                ("password", "p@ssw0rd!#$%"),
            ],
        )
        .await;
        assert!(matches!(outcome, AuthOutcome::Denied(_)));
    }

    #[tokio::test]
    async fn test_users_are_fixed_at_configuration() {
        let provider = provider_with_users(serde_json::json!([
            { "username": "alice", "password": "supersecret" }
        ]));
        let clone = provider.clone();

        // Only configured users exist, in every clone
        for identifier in [&provider, &clone] {
            let outcome =
                authenticate(identifier, &[("username", "alice"), ("password", "supersecret")])
                    .await;
            assert!(matches!(outcome, AuthOutcome::Resolved(_)));

            let outcome =
                authenticate(identifier, &[("username", "testuser"), ("password", "password123")])
                    .await;
            assert!(matches!(outcome, AuthOutcome::Denied(_)));
        }

        // No users configured: every login is denied
        let empty =
            PasswordIdentifier::from_config(&BrokerConfig::new("local", BROKER_TYPE)).unwrap();
        let outcome =
            authenticate(&empty, &[("username", "alice"), ("password", "supersecret")]).await;
        assert_eq!(outcome, AuthOutcome::Denied(IdentityError::InvalidCredentials.to_string()));
    }

    #[tokio::test]
    async fn test_callback_returns_cached_identity() {
        let provider = setup_test_provider();
        let mut store = IdentityStore::new();
        store.insert_identity(Identity::new("local", "alice"));

        // No credentials: only the cache can answer
        let outcome = provider.callback(&request(&[]), &mut store).await;
        let AuthOutcome::Resolved(identity) = outcome else {
            panic!("Expected cached identity");
        };
        assert_eq!(identity.subject, "alice");
    }

    #[tokio::test]
    async fn test_callback_ignores_expired_identity() {
        let provider = setup_test_provider();
        let mut store = IdentityStore::new();
        store.insert_identity(
            Identity::new("local", "alice").with_expiry(Utc::now() - Duration::minutes(1)),
        );

        let outcome = provider.callback(&request(&[]), &mut store).await;
        assert_eq!(outcome, AuthOutcome::denied("missing credentials"));
    }

    #[tokio::test]
    async fn test_logout_is_local() {
        let provider = setup_test_provider();
        let mut store = IdentityStore::new();
        store.insert_identity(Identity::new("local", "alice"));

        let url = provider
            .logout_redirect_url(&request(&[]), &store)
            .await
            .unwrap();
        assert!(url.is_none());
    }

    #[tokio::test]
    async fn test_from_config_with_plaintext_and_hashed_passwords() {
        let hash = hash_password("hashed-secret").unwrap();
        let config = BrokerConfig::new("local", BROKER_TYPE)
            .with_option(
                "users",
                serde_json::json!([
                    {
                        "username": "alice",
                        "password": "plain-secret",
                        "email": "alice@example.com",
                        "claims": { "department": "ops" }
                    },
                    { "username": "bob", "password_hash": hash }
                ]),
            )
            .with_option("identity_ttl_seconds", 3600);

        let provider = PasswordIdentifier::from_config(&config).unwrap();
        assert_eq!(provider.broker_id(), "local");

        let outcome =
            authenticate(&provider, &[("username", "alice"), ("password", "plain-secret")]).await;
        let AuthOutcome::Resolved(identity) = outcome else {
            panic!("Expected alice to resolve");
        };
        assert_eq!(identity.claim("department").unwrap(), "ops");
        assert_eq!(identity.claim("email").unwrap(), "alice@example.com");
        assert!(identity.expires_at.is_some());

        let outcome =
            authenticate(&provider, &[("username", "bob"), ("password", "hashed-secret")]).await;
        assert!(matches!(outcome, AuthOutcome::Resolved(_)));
    }

    #[test]
    fn test_from_config_rejects_bad_users() {
        let both = BrokerConfig::new("local", BROKER_TYPE).with_option(
            "users",
            serde_json::json!([{ "username": "alice", "password": "x", "password_hash": "y" }]),
        );
        assert!(matches!(
            PasswordIdentifier::from_config(&both),
            Err(IdentityError::InvalidOptions(_))
        ));

        let bad_hash = BrokerConfig::new("local", BROKER_TYPE).with_option(
            "users",
            serde_json::json!([{ "username": "alice", "password_hash": "not-a-phc-string" }]),
        );
        assert!(PasswordIdentifier::from_config(&bad_hash).is_err());

        let duplicate = BrokerConfig::new("local", BROKER_TYPE).with_option(
            "users",
            serde_json::json!([
                { "username": "alice", "password": "x" },
                { "username": "alice", "password": "y" }
            ]),
        );
        assert!(PasswordIdentifier::from_config(&duplicate).is_err());

        let zero_ttl = BrokerConfig::new("local", BROKER_TYPE).with_option("identity_ttl_seconds", 0);
        assert!(PasswordIdentifier::from_config(&zero_ttl).is_err());
    }

    #[test]
    fn test_factory_builds_identifier() {
        let identifier = PasswordIdentifier::factory(&BrokerConfig::new("staff", BROKER_TYPE))
            .unwrap()
            .unwrap();
        assert_eq!(identifier.broker_id(), "staff");
    }

    #[cfg(feature = "timing-tests")]
    #[tokio::test]
    async fn test_timing_attack_resistance() {
        use std::time::{Duration, Instant};

        let provider = setup_test_provider();

        const NUM_ATTEMPTS: usize = 10;
        let mut nonexistent_times = Vec::new();
        let mut wrong_password_times = Vec::new();

        for i in 0..NUM_ATTEMPTS {
            let username = format!("nonexistentuser{}", i);
            let start = Instant::now();
            let _ = authenticate(&provider, &[("username", username.as_str()), ("password", "anypassword")])
                .await;
            nonexistent_times.push(start.elapsed());
        }

        for i in 0..NUM_ATTEMPTS {
            let password = format!("wrongpassword{}", i);
            let start = Instant::now();
            let _ = authenticate(&provider, &[("username", "testuser"), ("password", password.as_str())])
                .await;
            wrong_password_times.push(start.elapsed());
        }

        let avg_nonexistent = nonexistent_times.iter().sum::<Duration>() / NUM_ATTEMPTS as u32;
        let avg_wrong_password =
            wrong_password_times.iter().sum::<Duration>() / NUM_ATTEMPTS as u32;

        let time_diff = if avg_nonexistent > avg_wrong_password {
            avg_nonexistent - avg_wrong_password
        } else {
            avg_wrong_password - avg_nonexistent
        };

        assert!(
            time_diff < Duration::from_millis(50),
            "Timing difference too large: {:?}. This could enable timing attacks.",
            time_diff
        );
    }

    #[tokio::test]
    async fn test_concurrent_authentication_attempts() {
        let provider = Arc::new(setup_test_provider());

        const CONCURRENT_ATTEMPTS: usize = 20;
        let mut handles = Vec::new();

        for i in 0..CONCURRENT_ATTEMPTS {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move {
                let password = if i % 2 == 0 {
                    "password123".to_string()
                } else {
                    format!("wrong_password_{}", i)
                };
                authenticate(&provider, &[("username", "testuser"), ("password", password.as_str())]).await
            }));
        }

        let mut successful_auths = 0;
        let mut failed_auths = 0;

        for handle in handles {
            match handle.await.unwrap() {
                AuthOutcome::Resolved(_) => successful_auths += 1,
                AuthOutcome::Denied(_) => failed_auths += 1,
                other => panic!("Unexpected outcome: {:?}", other),
            }
        }

        assert_eq!(successful_auths, CONCURRENT_ATTEMPTS / 2);
        assert_eq!(failed_auths, CONCURRENT_ATTEMPTS / 2);
    }
}
