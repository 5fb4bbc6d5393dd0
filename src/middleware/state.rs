use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use super::config::AuthSettings;
use super::extractor::SessionHandle;
use crate::flow::AuthFlow;

/// Shared state for auth route handlers.
pub(super) struct AuthState<P> {
    pub(super) flow: Arc<AuthFlow<P>>,
    pub(super) sessions: SessionHandle,
    pub(super) settings: AuthSettings,
}

// Manual Clone: avoid derive adding a `P: Clone` bound.
impl<P> Clone for AuthState<P> {
    fn clone(&self) -> Self {
        Self {
            flow: self.flow.clone(),
            sessions: self.sessions.clone(),
            settings: self.settings.clone(),
        }
    }
}

// PrivateCookieJar requires Key to be extractable from state
impl<P> FromRef<AuthState<P>> for Key {
    fn from_ref(state: &AuthState<P>) -> Self {
        state.settings.cookie_key.clone()
    }
}

impl<P> FromRef<AuthState<P>> for SessionHandle {
    fn from_ref(state: &AuthState<P>) -> Self {
        state.sessions.clone()
    }
}
