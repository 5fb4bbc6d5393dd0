use std::sync::Arc;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::response::Redirect;
use axum::routing::get;
use axum_extra::extract::PrivateCookieJar;

use super::config::LoginConfig;
use super::error::AuthError;
use super::extractor::SessionHandle;
use super::state::AuthState;
use crate::flow::{AuthFlow, CallbackParams};
use crate::oauth::IdentityProvider;
use crate::session::Session;

/// Create the login router: login, callback and logout.
///
/// `sessions` should be the same handle the application uses to read the
/// signed-in user.
pub fn auth_routes<P>(config: LoginConfig, provider: P, sessions: SessionHandle) -> Router
where
    P: IdentityProvider,
{
    let flow = AuthFlow::new(provider, &config.provider);
    let settings = config.settings;

    let router = Router::new()
        .route(&settings.login_path, get(login::<P>))
        .route(&settings.callback_path, get(callback::<P>))
        .route(&settings.logout_path, get(logout::<P>).post(logout::<P>));

    router.with_state(AuthState {
        flow: Arc::new(flow),
        sessions,
        settings,
    })
}

// ── Login ──────────────────────────────────────────────────────────

async fn login<P: IdentityProvider>(
    State(state): State<AuthState<P>>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let (session_id, mut session) = state.sessions.open(&jar).await?;

    let url = state.flow.initiate_login(&mut session);
    let (jar, session_id) = state.sessions.commit(jar, session_id, &session).await?;

    tracing::debug!(session_id = %session_id, "Redirecting to identity provider");
    Ok((jar, Redirect::to(url.as_str())))
}

// ── Callback ───────────────────────────────────────────────────────

async fn callback<P: IdentityProvider>(
    State(state): State<AuthState<P>>,
    jar: PrivateCookieJar,
    RawQuery(query): RawQuery,
) -> Result<(PrivateCookieJar, Redirect), AuthError> {
    let params = CallbackParams::from_query(query.as_deref().unwrap_or_default());
    let (session_id, mut session) = state.sessions.open(&jar).await?;

    let outcome = state.flow.handle_callback(&mut session, &params).await;
    let jar = if outcome.mutated_session() {
        state.sessions.commit(jar, session_id, &session).await?.0
    } else {
        jar
    };

    tracing::debug!(session_id = ?session_id, outcome = ?outcome, "OAuth callback handled");
    Ok((jar, Redirect::to(&state.settings.home_path)))
}

// ── Logout ─────────────────────────────────────────────────────────

async fn logout<P: IdentityProvider>(
    State(state): State<AuthState<P>>,
    jar: PrivateCookieJar,
) -> (PrivateCookieJar, Redirect) {
    let mut session = Session::new();

    if let Some(session_id) = state.sessions.session_id(&jar) {
        match state.sessions.load(&session_id).await {
            Ok(Some(existing)) => session = existing,
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Session lookup failed during logout"),
        }
        if let Err(e) = state.sessions.delete(&session_id).await {
            tracing::warn!(error = %e, "Session deletion failed during logout");
        }
    }

    let user = session
        .user()
        .and_then(|claims| claims.preferred_username())
        .map(str::to_string);
    let url = state.flow.logout(&mut session);
    tracing::info!(user = user.as_deref().unwrap_or("<anonymous>"), "User logged out");

    (
        jar.remove(state.sessions.removal_cookie()),
        Redirect::to(url.as_str()),
    )
}
