//! OAuth2 client implementation with PKCE support.

use crate::config::OidcBrokerOptions;
use crate::error::{OAuth2Error, OAuth2Result};
use crate::state::{FlowStateStore, OAuth2State};
use crate::types::{AuthorizationResponse, TokenResponse, UserClaims};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, thread_rng};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

/// PKCE code challenge and verifier
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceChallenge {
    pub fn new() -> Self {
        let code_verifier = Self::generate_code_verifier();
        let code_challenge = Self::generate_code_challenge(&code_verifier);

        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: "S256".to_string(),
        }
    }

    fn generate_code_verifier() -> String {
        let mut rng = thread_rng();
        let bytes: Vec<u8> = (0..64).map(|_| rng.r#gen::<u8>()).collect();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub(crate) fn generate_code_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

/// HTTP side of the authorization code flow for one provider.
#[derive(Clone)]
pub struct OAuth2Client {
    http_client: Client,
    options: OidcBrokerOptions,
}

impl OAuth2Client {
    pub fn new(options: OidcBrokerOptions) -> OAuth2Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(options.http_timeout_seconds))
            .build()?;

        Ok(Self {
            http_client,
            options,
        })
    }

    pub fn options(&self) -> &OidcBrokerOptions {
        &self.options
    }

    /// Build the provider authorization URL and record the pending state in
    /// `flow`.
    pub fn generate_authorization_url(
        &self,
        flow: &mut FlowStateStore<'_>,
        redirect_uri: &str,
        additional_params: &HashMap<String, String>,
    ) -> OAuth2Result<Url> {
        let mut url = Url::parse(&self.options.authorization_endpoint)?;

        let pkce = self.options.use_pkce.then(PkceChallenge::new);

        let state = OAuth2State::new(
            redirect_uri.to_string(),
            pkce.as_ref().map(|p| p.code_verifier.clone()),
            self.options.state_ttl_seconds,
        )?;
        flow.store(&state)?;

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.options.client_id);
            params.append_pair("redirect_uri", redirect_uri);
            params.append_pair("state", &state.state);

            if !self.options.scopes.is_empty() {
                params.append_pair("scope", &self.options.scopes.join(" "));
            }

            if let Some(pkce) = &pkce {
                params.append_pair("code_challenge", &pkce.code_challenge);
                params.append_pair("code_challenge_method", &pkce.code_challenge_method);
            }

            for (key, value) in self.options.auth_params.iter().chain(additional_params) {
                params.append_pair(key, value);
            }
        }

        debug!("Generated authorization URL for {}", url.host_str().unwrap_or_default());
        Ok(url)
    }

    /// Verify the callback against the pending state and exchange the code
    /// for tokens. The pending state is consumed whatever the outcome.
    pub async fn handle_callback(
        &self,
        flow: &mut FlowStateStore<'_>,
        callback_response: AuthorizationResponse,
    ) -> OAuth2Result<TokenResponse> {
        let Some(state_param) = callback_response.state.as_deref() else {
            return Err(match &callback_response.error {
                Some(error) => OAuth2Error::Refused(error.clone()),
                None => OAuth2Error::StateMismatch,
            });
        };

        let state = flow.retrieve(state_param)?;

        if let Some(error) = &callback_response.error {
            let error_desc = callback_response
                .error_description
                .as_deref()
                .unwrap_or("No description");
            return Err(OAuth2Error::Refused(format!(
                "{}: {}",
                error, error_desc
            )));
        }

        let code = callback_response
            .code
            .as_deref()
            .ok_or(OAuth2Error::MissingCode)?;

        self.exchange_code(code, state.code_verifier.as_deref(), &state.redirect_uri)
            .await
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
        redirect_uri: &str,
    ) -> OAuth2Result<TokenResponse> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("client_id", &self.options.client_id);
        params.insert("redirect_uri", redirect_uri);

        if !self.options.client_secret.is_empty() {
            params.insert("client_secret", &self.options.client_secret);
        }

        if let Some(verifier) = code_verifier {
            params.insert("code_verifier", verifier);
        }

        let response = self
            .http_client
            .post(&self.options.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(OAuth2Error::from_http)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Token exchange failed: {}", error_text);
            return Err(OAuth2Error::TokenRejected(error_text));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OAuth2Error::Timeout
            } else {
                OAuth2Error::MalformedTokens(e.to_string())
            }
        })?;

        info!("Successfully exchanged code for tokens");
        Ok(token_response)
    }

    /// Resolve the user from the userinfo endpoint, or from the ID token when
    /// no endpoint is configured.
    pub async fn get_user_info(&self, tokens: &TokenResponse) -> OAuth2Result<UserClaims> {
        let Some(userinfo_endpoint) = &self.options.userinfo_endpoint else {
            let id_token = tokens.id_token.as_deref().ok_or_else(|| {
                OAuth2Error::MalformedTokens(
                    "no id_token and no userinfo_endpoint configured".to_string(),
                )
            })?;
            return id_token_claims(id_token);
        };

        let response = self
            .http_client
            .get(userinfo_endpoint)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(OAuth2Error::from_http)?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("User info request failed: {}", error_text);
            return Err(OAuth2Error::UserInfoRejected(error_text));
        }

        let user_info: UserClaims = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OAuth2Error::Timeout
            } else {
                OAuth2Error::MalformedClaims(e.to_string())
            }
        })?;

        debug!(
            "Successfully retrieved user info for subject: {}",
            user_info.subject
        );
        Ok(user_info)
    }

    /// RP-initiated logout address, if the provider has one.
    pub fn end_session_url(
        &self,
        post_logout_redirect_uri: &Url,
        id_token_hint: Option<&str>,
    ) -> OAuth2Result<Option<Url>> {
        let Some(endpoint) = &self.options.end_session_endpoint else {
            return Ok(None);
        };

        let mut url = Url::parse(endpoint)?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.options.client_id);
            params.append_pair("post_logout_redirect_uri", post_logout_redirect_uri.as_str());
            if let Some(hint) = id_token_hint {
                params.append_pair("id_token_hint", hint);
            }
        }

        Ok(Some(url))
    }
}

/// Claims of an ID token received directly from the token endpoint over TLS.
/// The signature is not checked; the token never passed through the browser.
pub(crate) fn id_token_claims(id_token: &str) -> OAuth2Result<UserClaims> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| OAuth2Error::MalformedTokens("id_token is not a JWT".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| OAuth2Error::MalformedTokens(format!("id_token payload: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| OAuth2Error::MalformedClaims(format!("id_token: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_identity_core::IdentityStore;

    fn options(base: &str) -> OidcBrokerOptions {
        serde_json::from_value(serde_json::json!({
            "client_id": "test_client_id",
            "client_secret": "test_secret",
            "authorization_endpoint": format!("{}/auth", base),
            "token_endpoint": format!("{}/token", base),
            "userinfo_endpoint": format!("{}/userinfo", base),
            "end_session_endpoint": format!("{}/logout", base),
            "scopes": ["openid", "email"]
        }))
        .unwrap()
    }

    #[test]
    fn test_pkce_generation() {
        let pkce1 = PkceChallenge::new();
        let pkce2 = PkceChallenge::new();

        assert_ne!(pkce1.code_verifier, pkce2.code_verifier);
        assert_ne!(pkce1.code_challenge, pkce2.code_challenge);
        assert_eq!(pkce1.code_challenge_method, "S256");

        let expected_challenge = PkceChallenge::generate_code_challenge(&pkce1.code_verifier);
        assert_eq!(pkce1.code_challenge, expected_challenge);
    }

    #[test]
    fn test_authorization_url_generation() {
        let client = OAuth2Client::new(options("https://example.com")).unwrap();
        let mut store = IdentityStore::new();
        let mut flow = FlowStateStore::new(&mut store, "sso");

        let mut extra = HashMap::new();
        extra.insert("login_hint".to_string(), "alice".to_string());

        let url = client
            .generate_authorization_url(&mut flow, "http://localhost:3000/callback/sso", &extra)
            .unwrap();
        assert!(flow.is_pending());

        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.path(), "/auth");

        let params: HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(params.get("response_type"), Some(&"code".into()));
        assert_eq!(params.get("client_id"), Some(&"test_client_id".into()));
        assert_eq!(
            params.get("redirect_uri"),
            Some(&"http://localhost:3000/callback/sso".into())
        );
        assert_eq!(params.get("scope"), Some(&"openid email".into()));
        assert_eq!(params.get("login_hint"), Some(&"alice".into()));
        assert!(params.contains_key("state"));
        assert!(params.contains_key("code_challenge"));
        assert_eq!(params.get("code_challenge_method"), Some(&"S256".into()));
    }

    #[test]
    fn test_authorization_url_without_pkce() {
        let mut options = options("https://example.com");
        options.use_pkce = false;
        let client = OAuth2Client::new(options).unwrap();
        let mut store = IdentityStore::new();

        let url = client
            .generate_authorization_url(
                &mut FlowStateStore::new(&mut store, "sso"),
                "http://localhost:3000/callback/sso",
                &HashMap::new(),
            )
            .unwrap();

        assert!(!url.query_pairs().any(|(key, _)| key == "code_challenge"));
    }

    #[test]
    fn test_end_session_url() {
        let client = OAuth2Client::new(options("https://example.com")).unwrap();
        let back = Url::parse("http://localhost:3000/logoutCallback?broker=sso").unwrap();

        let url = client
            .end_session_url(&back, Some("header.payload.sig"))
            .unwrap()
            .unwrap();
        let params: HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(url.path(), "/logout");
        assert_eq!(params.get("id_token_hint"), Some(&"header.payload.sig".into()));
        assert_eq!(
            params.get("post_logout_redirect_uri"),
            Some(&back.as_str().into())
        );

        let mut local_only = options("https://example.com");
        local_only.end_session_endpoint = None;
        let client = OAuth2Client::new(local_only).unwrap();
        assert!(client.end_session_url(&back, None).unwrap().is_none());
    }

    #[test]
    fn test_id_token_claims() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"42","email":"bob@example.com"}"#);
        let token = format!("eyJhbGciOiJSUzI1NiJ9.{}.sig", payload);

        let user = id_token_claims(&token).unwrap();
        assert_eq!(user.subject, "42");
        assert_eq!(user.text("email"), Some("bob@example.com"));

        assert!(id_token_claims("garbage").is_err());
    }
}
