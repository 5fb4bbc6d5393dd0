use std::future::Future;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use url::Url;

use crate::cache::{self, CachedToken, TokenCache};
use crate::error::Error;
use crate::types::UserClaims;

/// Scopes every OIDC sign-in requests in addition to the configured ones.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity provider configuration.
///
/// Built once at startup and shared read-only. Endpoints default to the
/// v2.0 layout under the authority (`<authority>/oauth2/v2.0/...`).
///
/// ```rust,ignore
/// use corp_login::ProviderConfig;
///
/// let config = ProviderConfig::new(
///     "client-id",
///     "client-secret",
///     "https://login.microsoftonline.com/my-tenant".parse()?,
///     "https://my-app.com/getAToken".parse()?,
/// )
/// .with_scopes(vec!["User.Read".into()]);
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub struct ProviderConfig {
    pub(crate) client_id: String,
    pub(crate) client_secret: String,
    pub(crate) authority: Url,
    pub(crate) authorize_url: Url,
    pub(crate) token_url: Url,
    pub(crate) logout_url: Url,
    pub(crate) redirect_uri: Url,
    pub(crate) home_url: Url,
    pub(crate) scopes: Vec<String>,
}

impl ProviderConfig {
    /// Create a provider configuration.
    ///
    /// The home URL (post-login and post-logout landing page) defaults to the
    /// root of the redirect URI's origin.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authority: Url,
        redirect_uri: Url,
    ) -> Self {
        let mut home_url = redirect_uri.clone();
        home_url.set_path("/");
        home_url.set_query(None);
        home_url.set_fragment(None);

        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_url: authority_endpoint(&authority, "authorize"),
            token_url: authority_endpoint(&authority, "token"),
            logout_url: authority_endpoint(&authority, "logout"),
            authority,
            redirect_uri,
            home_url,
            scopes: vec!["User.Read".into()],
        }
    }

    /// Override the authorization endpoint.
    #[must_use]
    pub fn with_authorize_url(mut self, url: Url) -> Self {
        self.authorize_url = url;
        self
    }

    /// Override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Override the end-session endpoint.
    #[must_use]
    pub fn with_logout_url(mut self, url: Url) -> Self {
        self.logout_url = url;
        self
    }

    /// Override the landing page used after login and logout.
    #[must_use]
    pub fn with_home_url(mut self, url: Url) -> Self {
        self.home_url = url;
        self
    }

    /// Override the requested scopes (default: `["User.Read"]`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    #[must_use]
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn logout_url(&self) -> &Url {
        &self.logout_url
    }

    /// Callback address registered with the identity provider.
    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn home_url(&self) -> &Url {
        &self.home_url
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authority", &self.authority.as_str())
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

fn authority_endpoint(authority: &Url, endpoint: &str) -> Url {
    let mut url = authority.clone();
    let base = authority.path().trim_end_matches('/');
    url.set_path(&format!("{base}/oauth2/v2.0/{endpoint}"));
    url.set_query(None);
    url
}

/// The two operations the login flow needs from an identity provider.
pub trait IdentityProvider: Send + Sync + 'static {
    /// Builds the URL the browser is sent to. `state` must come back
    /// unmodified on the callback.
    fn authorization_url(&self, scopes: &[String], state: &str, redirect_uri: &Url) -> Url;

    /// Redeems an authorization code, recording the issued tokens in `cache`.
    fn exchange_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &Url,
        cache: &mut TokenCache,
    ) -> impl Future<Output = Result<TokenGrant, Error>> + Send;
}

/// Tokens issued by a successful code exchange.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    /// Decoded ID token payload; empty if the authority issued no ID token.
    pub id_token_claims: UserClaims,
}

impl TokenGrant {
    /// Create a grant carrying only an access token and claims.
    #[must_use]
    pub fn new(access_token: impl Into<String>, id_token_claims: UserClaims) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".into(),
            expires_in: None,
            refresh_token: None,
            scopes: Vec::new(),
            id_token_claims,
        }
    }
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Confidential-client `OAuth2` / OIDC client for the configured authority.
pub struct AuthClient {
    client_id: String,
    client_secret: String,
    authorize_url: Url,
    token_url: Url,
    http: reqwest::Client,
}

impl AuthClient {
    /// Create a client bound to the configured credentials and authority.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the client id or secret is empty or the
    /// authority is not an http(s) URL, and [`Error::Http`] if the HTTP
    /// client cannot be built.
    pub fn new(config: &ProviderConfig) -> Result<Self, Error> {
        if config.client_id.trim().is_empty() {
            return Err(Error::Config("client id must not be empty".into()));
        }
        if config.client_secret.trim().is_empty() {
            return Err(Error::Config("client secret must not be empty".into()));
        }
        if !matches!(config.authority.scheme(), "http" | "https")
            || config.authority.cannot_be_a_base()
        {
            return Err(Error::Config(format!(
                "authority must be an http(s) URL, got {}",
                config.authority
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            http,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let (error, description) = match serde_json::from_str::<OAuthErrorBody>(&body) {
            Ok(parsed) => (parsed.error, parsed.error_description),
            Err(_) => (format!("http_{status}"), Some(body).filter(|b| !b.is_empty())),
        };
        Err(Error::OAuth {
            operation,
            error,
            description,
            status: Some(status),
        })
    }
}

impl IdentityProvider for AuthClient {
    fn authorization_url(&self, scopes: &[String], state: &str, redirect_uri: &Url) -> Url {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("response_mode", "query")
            .append_pair("scope", &request_scope(scopes))
            .append_pair("state", state);
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &Url,
        cache: &mut TokenCache,
    ) -> Result<TokenGrant, Error> {
        let scope = request_scope(scopes);
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, "token exchange").await?;
        let token = response.json::<TokenResponse>().await?;

        if token.access_token.is_empty() {
            return Err(Error::OAuth {
                operation: "token exchange",
                error: "invalid_response".into(),
                description: Some("token endpoint returned an empty access token".into()),
                status: None,
            });
        }

        let id_token_claims = match token.id_token.as_deref() {
            Some(id_token) => decode_id_token_claims(id_token)?,
            None => UserClaims::default(),
        };

        let granted_scopes = token
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| scopes.to_vec());

        let expires_at = token
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| time::OffsetDateTime::now_utc() + time::Duration::seconds(secs));

        cache.insert(
            cache::account_key(&id_token_claims),
            CachedToken {
                access_token: token.access_token.clone(),
                token_type: token.token_type.clone(),
                refresh_token: token.refresh_token.clone(),
                id_token: token.id_token,
                scopes: granted_scopes.clone(),
                expires_at,
            },
        );

        Ok(TokenGrant {
            access_token: token.access_token,
            token_type: token.token_type,
            expires_in: token.expires_in,
            refresh_token: token.refresh_token,
            scopes: granted_scopes,
            id_token_claims,
        })
    }
}

/// Space-joined scope string: configured scopes followed by the reserved OIDC
/// scopes, without duplicates.
fn request_scope(scopes: &[String]) -> String {
    let mut merged: Vec<&str> = Vec::with_capacity(scopes.len() + RESERVED_SCOPES.len());
    for scope in scopes.iter().map(String::as_str).chain(RESERVED_SCOPES) {
        if !scope.is_empty() && !merged.contains(&scope) {
            merged.push(scope);
        }
    }
    merged.join(" ")
}

/// Decodes the payload segment of a compact JWT into claims.
///
/// The signature is not checked: the token arrived directly from the token
/// endpoint over TLS.
///
/// # Errors
///
/// Returns [`Error::Token`] if the token is not a three-segment JWT or its
/// payload is not a base64url-encoded JSON object.
pub fn decode_id_token_claims(id_token: &str) -> Result<UserClaims, Error> {
    let mut segments = id_token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(Error::Token("malformed JWT: expected three segments".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::Token(format!("invalid base64 payload: {e}")))?;

    serde_json::from_slice(&bytes).map_err(|e| Error::Token(format!("invalid claims: {e}")))
}
