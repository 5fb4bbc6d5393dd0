#![doc = include_str!("../README.md")]

pub mod cache;
pub mod error;
pub mod flow;
#[cfg(feature = "middleware")]
pub mod middleware;
pub mod oauth;
pub mod session;
pub mod store;
pub mod types;

// Re-exports for convenient access
pub use cache::{CachedToken, TokenCache};
pub use error::Error;
pub use flow::{AuthFlow, CallbackOutcome, CallbackParams};
pub use oauth::{AuthClient, IdentityProvider, ProviderConfig, TokenGrant, decode_id_token_claims};
pub use session::{AuthStage, Session};
pub use store::{
    DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL, FileSessionStore, MemorySessionStore, SessionStore,
    StoreError,
};
pub use types::{Notice, NoticeLevel, SessionId, UserClaims};
