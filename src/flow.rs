//! The login state machine: `Anonymous → AwaitingCallback → Authenticated`.
//!
//! [`AuthFlow`] knows nothing about HTTP. It mutates a [`Session`] and tells
//! the caller where to send the browser; the Axum routes in
//! [`middleware`](crate::middleware) load and persist the session around it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use serde::Deserialize;
use url::Url;

use crate::cache::TokenCache;
use crate::oauth::{IdentityProvider, ProviderConfig};
use crate::session::Session;
use crate::types::Notice;

pub const LOGIN_SUCCESS_NOTICE: &str = "Login successful!";
pub const LOGIN_FAILED_NOTICE: &str = "Login failed. Please try again.";
pub const TOKEN_FAILED_NOTICE: &str = "Login failed during token acquisition";

/// Query parameters the identity provider appends to the callback URL.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Reads the callback parameters from a raw query string.
    ///
    /// A repeated key keeps its first value and undecodable bytes are
    /// replaced, so any query yields parameters and a malformed one simply
    /// fails the state check.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "state" => &mut params.state,
                "code" => &mut params.code,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

/// What [`AuthFlow::handle_callback`] did with a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// State missing or not the one issued to this session; nothing changed.
    StateMismatch,
    /// The provider reported an error instead of a code.
    ProviderError {
        error: String,
        description: Option<String>,
    },
    /// Code redeemed, user stored in the session.
    Authenticated,
    /// Code redemption failed.
    ExchangeFailed { description: String },
    /// State matched but neither `error` nor `code` was present.
    Ignored,
}

impl CallbackOutcome {
    /// Whether the session was modified and needs to be persisted.
    #[must_use]
    pub fn mutated_session(&self) -> bool {
        !matches!(self, Self::StateMismatch | Self::Ignored)
    }
}

/// Login flow controller bound to one identity provider.
pub struct AuthFlow<P> {
    provider: P,
    scopes: Vec<String>,
    redirect_uri: Url,
    logout_url: Url,
}

impl<P: IdentityProvider> AuthFlow<P> {
    #[must_use]
    pub fn new(provider: P, config: &ProviderConfig) -> Self {
        let mut logout_url = config.logout_url().clone();
        logout_url
            .query_pairs_mut()
            .append_pair("post_logout_redirect_uri", config.home_url().as_str());

        Self {
            provider,
            scopes: config.scopes().to_vec(),
            redirect_uri: config.redirect_uri().clone(),
            logout_url,
        }
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Starts a login attempt: issues a fresh state into the session and
    /// returns the authorization URL to redirect to.
    pub fn initiate_login(&self, session: &mut Session) -> Url {
        let state = new_state();
        let url = self
            .provider
            .authorization_url(&self.scopes, &state, &self.redirect_uri);
        session.set_state(state);
        url
    }

    /// Processes the provider's redirect back to the callback path.
    ///
    /// Checks run in a fixed order: state, then `error`, then `code`. The
    /// caller redirects home whatever the outcome.
    pub async fn handle_callback(
        &self,
        session: &mut Session,
        params: &CallbackParams,
    ) -> CallbackOutcome {
        let state_matches = matches!(
            (session.state(), params.state.as_deref()),
            (Some(expected), Some(received)) if expected == received
        );
        if !state_matches {
            tracing::warn!("OAuth state mismatch, possible CSRF; ignoring callback");
            return CallbackOutcome::StateMismatch;
        }

        if let Some(error) = &params.error {
            session.take_state();
            let description = params.error_description.clone();
            tracing::warn!(
                error = %error,
                description = description.as_deref().unwrap_or(""),
                "Login failed at identity provider"
            );
            session.push_notice(Notice::danger(LOGIN_FAILED_NOTICE));
            return CallbackOutcome::ProviderError {
                error: error.clone(),
                description,
            };
        }

        let Some(code) = &params.code else {
            return CallbackOutcome::Ignored;
        };
        session.take_state();

        let mut cache = TokenCache::deserialize(session.token_cache());
        let result = self
            .provider
            .exchange_code(code, &self.scopes, &self.redirect_uri, &mut cache)
            .await;

        match result {
            Ok(grant) if !grant.access_token.is_empty() => {
                let username = grant
                    .id_token_claims
                    .preferred_username()
                    .unwrap_or("<unknown>")
                    .to_string();
                session.set_user(grant.id_token_claims);
                if cache.is_dirty() {
                    match cache.serialize() {
                        Ok(blob) => session.set_token_cache(blob),
                        Err(e) => tracing::error!(error = %e, "Token cache not persisted"),
                    }
                }
                session.push_notice(Notice::success(LOGIN_SUCCESS_NOTICE));
                tracing::info!(user = %username, "User logged in");
                CallbackOutcome::Authenticated
            }
            Ok(_) => self.exchange_failed(session, "no access token issued".into()),
            Err(e) => self.exchange_failed(session, e.description()),
        }
    }

    fn exchange_failed(&self, session: &mut Session, description: String) -> CallbackOutcome {
        tracing::warn!(description = %description, "Failed to acquire token");
        session.push_notice(Notice::danger(format!("{TOKEN_FAILED_NOTICE}: {description}")));
        CallbackOutcome::ExchangeFailed { description }
    }

    /// Ends the local session and returns the provider's logout URL, which
    /// sends the browser back home afterwards.
    pub fn logout(&self, session: &mut Session) -> Url {
        session.clear();
        self.logout_url.clone()
    }

    #[must_use]
    pub fn logout_url(&self) -> &Url {
        &self.logout_url
    }
}

/// 16 random bytes, base64url without padding: 22 URL-safe characters.
fn new_state() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}
