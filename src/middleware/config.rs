use std::time::Duration;

use axum_extra::extract::cookie::Key;
use url::Url;

use super::error::AuthError;
use crate::oauth::ProviderConfig;
use crate::store::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL};

const DEFAULT_REDIRECT_PATH: &str = "/getAToken";
const DEFAULT_SCOPE: &str = "User.Read";
const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// Route and cookie settings shared by config and runtime state.
#[derive(Clone)]
pub(crate) struct AuthSettings {
    pub(crate) cookie_key: Key,
    pub(crate) session_cookie_name: String,
    pub(crate) secure_cookies: bool,
    pub(crate) login_path: String,
    pub(crate) logout_path: String,
    pub(crate) callback_path: String,
    pub(crate) home_path: String,
    pub(crate) session_ttl: Duration,
    pub(crate) max_sessions: usize,
}

impl AuthSettings {
    fn defaults(provider: &ProviderConfig) -> Self {
        Self {
            cookie_key: Key::generate(),
            session_cookie_name: "__corp_session".into(),
            secure_cookies: provider.redirect_uri().scheme() == "https",
            login_path: "/login".into(),
            logout_path: "/logout".into(),
            callback_path: provider.redirect_uri().path().to_string(),
            home_path: provider.home_url().path().to_string(),
            session_ttl: DEFAULT_SESSION_TTL,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

/// Login configuration: identity provider settings plus routes and cookies.
///
/// Use [`from_env()`](LoginConfig::from_env) at startup, or
/// [`new()`](LoginConfig::new) with `with_*` methods for full control.
pub struct LoginConfig {
    pub(super) provider: ProviderConfig,
    pub(super) settings: AuthSettings,
}

impl LoginConfig {
    /// Create config around a provider configuration.
    ///
    /// The callback route is the path of the provider's redirect URI; cookies
    /// are marked `Secure` when that URI is https.
    #[must_use]
    pub fn new(provider: ProviderConfig) -> Self {
        let settings = AuthSettings::defaults(&provider);
        Self { provider, settings }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `CLIENT_ID`: OAuth2 client ID
    /// - `CLIENT_SECRET`: OAuth2 client secret
    /// - `AUTHORITY`: identity provider tenant URL
    ///
    /// # Optional env vars
    /// - `REDIRECT_PATH`: callback path (default `/getAToken`)
    /// - `SCOPE`: comma- or space-separated scopes (default `User.Read`)
    /// - `APP_BASE_URL`: public origin of this app (default `http://localhost:5000`)
    /// - `LOGOUT_URL`: override the provider's end-session endpoint
    /// - `COOKIE_KEY`: cookie encryption key bytes
    /// - `SESSION_LIFETIME`: seconds a session lives after its last save (default 31 days)
    /// - `SESSION_THRESHOLD`: sessions kept before the oldest are evicted (default 500)
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if required env vars are missing or empty,
    /// or a URL is invalid.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AuthError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &str| var(name).ok_or_else(|| AuthError::Config(format!("{name} is required")));
        let parse_url = |name: &str, value: &str| {
            value
                .parse::<Url>()
                .map_err(|e| AuthError::Config(format!("{name}: {e}")))
        };

        let client_id = required("CLIENT_ID")?;
        let client_secret = required("CLIENT_SECRET")?;
        let authority = parse_url("AUTHORITY", &required("AUTHORITY")?)?;

        let base_url = parse_url(
            "APP_BASE_URL",
            &var("APP_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
        )?;
        let redirect_path = var("REDIRECT_PATH").unwrap_or_else(|| DEFAULT_REDIRECT_PATH.into());
        if !redirect_path.starts_with('/') {
            return Err(AuthError::Config(format!(
                "REDIRECT_PATH must start with '/', got {redirect_path}"
            )));
        }
        let redirect_uri = base_url
            .join(&redirect_path)
            .map_err(|e| AuthError::Config(format!("REDIRECT_PATH: {e}")))?;

        let scopes = parse_scopes(&var("SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.into()));

        let mut provider = ProviderConfig::new(client_id, client_secret, authority, redirect_uri)
            .with_scopes(scopes);
        if let Some(logout) = var("LOGOUT_URL") {
            provider = provider.with_logout_url(parse_url("LOGOUT_URL", &logout)?);
        }

        let mut config = Self::new(provider);
        if let Some(k) = var("COOKIE_KEY") {
            let key = Key::try_from(k.as_bytes()).map_err(|_| {
                AuthError::Config(
                    "COOKIE_KEY is set but invalid (must be at least 64 bytes). \
                     Remove the env var to use an ephemeral key, or provide a valid key."
                        .into(),
                )
            })?;
            config = config.with_cookie_key(key);
        }
        if let Some(secs) = var("SESSION_LIFETIME") {
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|e| AuthError::Config(format!("SESSION_LIFETIME: {e}")))?;
            config = config.with_session_ttl(Duration::from_secs(secs));
        }
        if let Some(max) = var("SESSION_THRESHOLD") {
            let max = max
                .trim()
                .parse::<usize>()
                .map_err(|e| AuthError::Config(format!("SESSION_THRESHOLD: {e}")))?;
            config = config.with_max_sessions(max);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.settings.cookie_key = key;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.settings.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_path = path.into();
        self
    }

    /// Local path browsers land on after the callback.
    #[must_use]
    pub fn with_home_path(mut self, path: impl Into<String>) -> Self {
        self.settings.home_path = path.into();
        self
    }

    /// How long a stored session lives after its last save.
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.settings.session_ttl = ttl;
        self
    }

    /// Sessions a store keeps before evicting the least recently saved.
    #[must_use]
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.settings.max_sessions = max;
        self
    }

    #[must_use]
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.settings.callback_path
    }

    #[must_use]
    pub fn home_path(&self) -> &str {
        &self.settings.home_path
    }

    #[must_use]
    pub fn session_cookie_name(&self) -> &str {
        &self.settings.session_cookie_name
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.settings.session_ttl
    }

    #[must_use]
    pub fn max_sessions(&self) -> usize {
        self.settings.max_sessions
    }
}

fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
