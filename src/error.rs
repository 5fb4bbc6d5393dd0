#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The authority rejected a request with an OAuth error body.
    #[error("OAuth2 {operation} failed: {error}")]
    OAuth {
        operation: &'static str,
        error: String,
        description: Option<String>,
        status: Option<u16>,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ID token error: {0}")]
    Token(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Token cache error: {0}")]
    Cache(String),
}

impl Error {
    /// Human-readable reason suitable for a user-facing notice.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::OAuth {
                error, description, ..
            } => description.clone().unwrap_or_else(|| error.clone()),
            other => other.to_string(),
        }
    }
}
