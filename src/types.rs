use derive_more::{Display, From, FromStr, Into};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use ulid::Ulid;

/// Server-side session identifier carried in the private session cookie.
///
/// Always a ULID: cookie values that do not parse are treated as "no session"
/// and the visitor is issued a fresh one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr, From, Into,
)]
#[serde(transparent)]
pub struct SessionId(pub Ulid);

impl SessionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

/// Claims asserted by the identity provider in the ID token.
///
/// Stored verbatim in the session; no claim is validated or rewritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, From, Into)]
#[serde(transparent)]
pub struct UserClaims(pub Map<String, JsonValue>);

impl UserClaims {
    /// Gets a claim value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Gets a claim as a string, if present and a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(JsonValue::as_str)
    }

    /// The `preferred_username` claim (UPN or email for most tenants).
    #[must_use]
    pub fn preferred_username(&self) -> Option<&str> {
        self.get_str("preferred_username")
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    #[display("success")]
    Success,
    #[display("danger")]
    Danger,
}

/// One-shot message queued in the session and shown on the next page view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn danger(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Danger,
            message: message.into(),
        }
    }
}
