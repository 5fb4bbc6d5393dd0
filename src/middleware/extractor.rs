use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, OptionalFromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key};

use super::config::LoginConfig;
use super::cookies;
use super::error::AuthError;
use crate::session::Session;
use crate::store::{SessionStore, StoreError};
use crate::types::{SessionId, UserClaims};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe wrapper for SessionStore (needed for Arc<dyn>).
pub(super) trait SessionStoreDyn: Send + Sync {
    fn load_dyn<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, StoreError>>;

    fn save_dyn<'a>(
        &'a self,
        id: &'a SessionId,
        session: &'a Session,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn delete_dyn<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, Result<(), StoreError>>;
}

impl<T: SessionStore> SessionStoreDyn for T {
    fn load_dyn<'a>(
        &'a self,
        id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, StoreError>> {
        Box::pin(self.load(id))
    }

    fn save_dyn<'a>(
        &'a self,
        id: &'a SessionId,
        session: &'a Session,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.save(id, session))
    }

    fn delete_dyn<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(self.delete(id))
    }
}

/// Cookie-keyed access to the session store.
///
/// Shared by the auth routes and application handlers, so both see the same
/// sessions. Cheap to clone.
///
/// ```rust,ignore
/// async fn home(State(sessions): State<SessionHandle>, headers: HeaderMap) -> String {
///     match sessions.resolve(&headers).await {
///         Ok(Some((_, session))) if session.is_authenticated() => "Welcome back".into(),
///         _ => "Please sign in".into(),
///     }
/// }
/// ```
#[derive(Clone)]
pub struct SessionHandle {
    store: Arc<dyn SessionStoreDyn>,
    cookie_key: Key,
    cookie_name: Arc<str>,
    secure_cookies: bool,
}

impl SessionHandle {
    #[must_use]
    pub fn new<S: SessionStore>(store: S, config: &LoginConfig) -> Self {
        Self {
            store: Arc::new(store),
            cookie_key: config.settings.cookie_key.clone(),
            cookie_name: config.settings.session_cookie_name.as_str().into(),
            secure_cookies: config.settings.secure_cookies,
        }
    }

    /// Decrypting view over the request's cookies.
    #[must_use]
    pub fn jar(&self, headers: &HeaderMap) -> PrivateCookieJar {
        PrivateCookieJar::from_headers(headers, self.cookie_key.clone())
    }

    /// Session id carried by the request, if any.
    #[must_use]
    pub fn session_id(&self, jar: &PrivateCookieJar) -> Option<SessionId> {
        cookies::get_session_id(jar, &self.cookie_name)
    }

    /// Looks up the request's session without creating one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the store fails.
    pub async fn resolve(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<(SessionId, Session)>, AuthError> {
        let Some(id) = self.session_id(&self.jar(headers)) else {
            return Ok(None);
        };
        let session = self.load(&id).await?;
        Ok(session.map(|s| (id, s)))
    }

    /// Loads the request's session. A visitor without a session cookie gets a
    /// blank session and no id; [`commit`](Self::commit) issues one.
    pub(super) async fn open(
        &self,
        jar: &PrivateCookieJar,
    ) -> Result<(Option<SessionId>, Session), AuthError> {
        match self.session_id(jar) {
            Some(id) => {
                let session = self.load(&id).await?.unwrap_or_default();
                Ok((Some(id), session))
            }
            None => Ok((None, Session::new())),
        }
    }

    /// Saves `session`, first issuing a new id and cookie when the visitor
    /// had none.
    pub(super) async fn commit(
        &self,
        jar: PrivateCookieJar,
        id: Option<SessionId>,
        session: &Session,
    ) -> Result<(PrivateCookieJar, SessionId), AuthError> {
        let (jar, id) = match id {
            Some(id) => (jar, id),
            None => {
                let id = SessionId::generate();
                let cookie = cookies::session_cookie(&self.cookie_name, &id, self.secure_cookies);
                (jar.add(cookie), id)
            }
        };
        self.save(&id, session).await?;
        Ok((jar, id))
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the store fails.
    pub async fn load(&self, id: &SessionId) -> Result<Option<Session>, AuthError> {
        self.store.load_dyn(id).await.map_err(AuthError::store)
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the store fails.
    pub async fn save(&self, id: &SessionId, session: &Session) -> Result<(), AuthError> {
        self.store.save_dyn(id, session).await.map_err(AuthError::store)
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Store`] if the store fails.
    pub async fn delete(&self, id: &SessionId) -> Result<(), AuthError> {
        self.store.delete_dyn(id).await.map_err(AuthError::store)
    }

    pub(super) fn removal_cookie(&self) -> Cookie<'static> {
        cookies::clear_session_cookie(&self.cookie_name)
    }
}

/// Signed-in user extracted from the session cookie.
///
/// Use as an Axum extractor in route handlers whose state provides a
/// [`SessionHandle`]. Returns `401 Unauthorized` if the visitor has not
/// completed a login.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected(user: AuthUser) -> impl IntoResponse {
///     format!("Hello, {}", user.claims.preferred_username().unwrap_or("stranger"))
/// }
///
/// // Optional: accessible to both authenticated and anonymous users
/// async fn public(user: Option<AuthUser>) -> impl IntoResponse {
///     match user {
///         Some(u) => format!("Hello, {}", u.claims.preferred_username().unwrap_or("user")),
///         None => "Hello, guest".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Session ID (from cookie).
    pub session_id: SessionId,
    /// ID token claims stored at login.
    pub claims: UserClaims,
}

impl<T> FromRequestParts<T> for AuthUser
where
    T: Send + Sync,
    SessionHandle: FromRef<T>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &T) -> Result<Self, Self::Rejection> {
        let sessions = SessionHandle::from_ref(state);
        let (session_id, session) = sessions
            .resolve(&parts.headers)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let claims = session.user().cloned().ok_or(AuthError::Unauthenticated)?;
        Ok(Self { session_id, claims })
    }
}

impl<T> OptionalFromRequestParts<T> for AuthUser
where
    T: Send + Sync,
    SessionHandle: FromRef<T>,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &T,
    ) -> Result<Option<Self>, Self::Rejection> {
        match <Self as FromRequestParts<T>>::from_request_parts(parts, state).await {
            Ok(user) => Ok(Some(user)),
            Err(AuthError::Unauthenticated) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
