use std::time::Duration;
use url::Url;

pub const DEFAULT_MOUNT_PATH: &str = "/core/auth";
pub const DEFAULT_COOKIE_NAME: &str = "ras_session";

/// Controller settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Externally visible base URL; callback addresses are built from it.
    pub public_url: Url,
    /// Where the auth router is nested, e.g. `/core/auth`.
    pub mount_path: String,
    pub default_landing: String,
    pub logged_out_url: String,
    pub cookie_name: String,
    pub secure_cookie: bool,
    /// Serve the `debug` introspection route.
    pub debug: bool,
    /// Bound on one broker's step of a logout chain.
    pub logout_step_timeout: Duration,
}

impl AuthSettings {
    pub fn new(public_url: Url) -> Result<Self, url::ParseError> {
        if public_url.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
        }

        Ok(Self {
            public_url,
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            default_landing: "/".to_string(),
            logged_out_url: "/".to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            secure_cookie: false,
            debug: false,
            logout_step_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = mount_path.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_logout_step_timeout(mut self, timeout: Duration) -> Self {
        self.logout_step_timeout = timeout;
        self
    }

    pub fn callback_url(&self, broker_id: &str) -> Url {
        self.endpoint_url(&["callback", broker_id])
    }

    /// The logout-callback address, tagged with the broker the browser is
    /// sent to.
    pub fn logout_callback_url(&self, broker_id: &str) -> Url {
        let mut url = self.endpoint_url(&["logoutCallback"]);
        url.query_pairs_mut().append_pair("broker", broker_id);
        url
    }

    fn endpoint_url(&self, segments: &[&str]) -> Url {
        let mut url = self.public_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        // Checked in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .extend(self.mount_path.split('/').filter(|s| !s.is_empty()))
                .extend(segments);
        }
        url
    }

    /// `requested` if it stays on this site, `fallback` otherwise.
    pub fn sanitize_redirect(&self, requested: Option<&str>, fallback: &str) -> String {
        let Some(requested) = requested.map(str::trim).filter(|r| !r.is_empty()) else {
            return fallback.to_string();
        };

        // Browsers drop tab/CR/LF inside URLs, so `/\t/host` would act as `//host`
        if requested
            .chars()
            .any(|c| c.is_control() || c.is_whitespace())
        {
            return fallback.to_string();
        }

        if requested.starts_with('/') && !requested.starts_with("//") && !requested.contains('\\')
        {
            return requested.to_string();
        }

        match Url::parse(requested) {
            Ok(url) if url.origin() == self.public_url.origin() => url.to_string(),
            _ => fallback.to_string(),
        }
    }
}
