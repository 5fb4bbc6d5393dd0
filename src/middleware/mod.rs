//! Plug-and-play login routes for Axum.
//!
//! Wires [`AuthFlow`](crate::flow::AuthFlow) to HTTP: a private (encrypted)
//! cookie carries the session id, a [`SessionStore`](crate::store::SessionStore)
//! holds the session record.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use corp_login::middleware::{LoginConfig, SessionHandle, auth_routes};
//! use corp_login::{AuthClient, MemorySessionStore};
//!
//! // 1. Configure from environment
//! let config = LoginConfig::from_env()?;
//! let client = AuthClient::new(config.provider())?;
//!
//! // 2. Share one session handle between the auth routes and your handlers
//! let sessions = SessionHandle::new(MemorySessionStore::new(), &config);
//!
//! // 3. Mount auth routes
//! let app = axum::Router::new()
//!     .merge(auth_routes(config, client, sessions.clone()));
//!
//! // 4. Use AuthUser (or SessionHandle::resolve) in your handlers
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod routes;
mod state;

pub use config::LoginConfig;
pub use error::AuthError;
pub use extractor::{AuthUser, SessionHandle};
pub use routes::auth_routes;

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
