use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::UserClaims;

const CACHE_FORMAT_VERSION: u32 = 1;
const DEFAULT_ACCOUNT: &str = "default";

/// A token set issued for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<time::OffsetDateTime>,
}

/// Serializable token cache kept in the visitor's session.
///
/// Tracks whether it changed since it was loaded, so callers only write it
/// back to the session when [`is_dirty`](TokenCache::is_dirty) is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    tokens: BTreeMap<String, CachedToken>,
    #[serde(skip)]
    dirty: bool,
}

impl TokenCache {
    /// Empty, clean cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            tokens: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Rebuilds a cache from the blob stored in the session.
    ///
    /// Never fails: a missing or empty blob yields an empty cache, and an
    /// unreadable one is logged and discarded so the login can still proceed.
    #[must_use]
    pub fn deserialize(blob: Option<&str>) -> Self {
        let Some(blob) = blob.filter(|b| !b.trim().is_empty()) else {
            return Self::new();
        };

        match serde_json::from_str::<Self>(blob) {
            Ok(mut cache) => {
                cache.version = CACHE_FORMAT_VERSION;
                cache.dirty = false;
                cache
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable token cache");
                Self::new()
            }
        }
    }

    /// Produces the form persisted in the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] if the cache cannot be encoded.
    pub fn serialize(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Cache(e.to_string()))
    }

    /// Whether the contents changed since the cache was created or loaded.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Stores `token` under `account`, marking the cache dirty only if the
    /// stored entry actually changed.
    pub fn insert(&mut self, account: impl Into<String>, token: CachedToken) {
        let account = account.into();
        if self.tokens.get(&account) == Some(&token) {
            return;
        }
        self.tokens.insert(account, token);
        self.dirty = true;
    }

    #[must_use]
    pub fn get(&self, account: &str) -> Option<&CachedToken> {
        self.tokens.get(account)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Cache key for the account described by `claims`.
///
/// `"<oid>.<tid>"` when the tenant-scoped object id is present, else `sub`.
#[must_use]
pub fn account_key(claims: &UserClaims) -> String {
    match (claims.get_str("oid"), claims.get_str("tid")) {
        (Some(oid), Some(tid)) => format!("{oid}.{tid}"),
        _ => claims
            .get_str("sub")
            .unwrap_or(DEFAULT_ACCOUNT)
            .to_string(),
    }
}
