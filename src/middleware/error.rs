use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::store::StoreError;

/// Authentication errors for the middleware layer.
///
/// Login failures (state mismatch, provider errors, failed exchanges) are not
/// errors here: they end in a redirect home with a notice.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No session, or a session without a signed-in user.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Session store operation failed.
    #[error("Session store error: {0}")]
    Store(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    pub(crate) fn store(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()).into_response(),
            Self::Store(_) | Self::Config(_) => {
                tracing::error!(error = %self, "Auth internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<crate::error::Error> for AuthError {
    fn from(e: crate::error::Error) -> Self {
        Self::Config(e.to_string())
    }
}
