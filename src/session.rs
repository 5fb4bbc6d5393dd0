use serde::{Deserialize, Serialize};

use crate::types::{Notice, UserClaims};

/// Where a visitor stands in the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    Anonymous,
    AwaitingCallback,
    Authenticated,
}

/// Per-visitor session record.
///
/// Only the login flow writes `state`, `user` and `token_cache`; the fields
/// are private so nothing else can put an unknown key into a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserClaims>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_cache: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    notices: Vec<Notice>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stage(&self) -> AuthStage {
        if self.user.is_some() {
            AuthStage::Authenticated
        } else if self.state.is_some() {
            AuthStage::AwaitingCallback
        } else {
            AuthStage::Anonymous
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Pending authorization state, if a login is in flight.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = Some(state.into());
    }

    /// Removes and returns the pending state so it cannot be replayed.
    pub fn take_state(&mut self) -> Option<String> {
        self.state.take()
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserClaims> {
        self.user.as_ref()
    }

    pub fn set_user(&mut self, claims: UserClaims) {
        self.user = Some(claims);
    }

    /// Serialized token cache blob.
    #[must_use]
    pub fn token_cache(&self) -> Option<&str> {
        self.token_cache.as_deref()
    }

    pub fn set_token_cache(&mut self, blob: String) {
        self.token_cache = Some(blob);
    }

    pub fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    #[must_use]
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Drains queued notices; each is shown once.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Forgets everything: state, user, token cache and notices.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
