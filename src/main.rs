//! corp-login server: mounts the login routes and a plain-text home view.

use anyhow::{Context, Result, bail};
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use corp_login::middleware::{AuthError, LoginConfig, SessionHandle, auth_routes};
use corp_login::{AuthClient, FileSessionStore, MemorySessionStore};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_SESSION_DIR: &str = "sessions";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = LoginConfig::from_env().context("loading login configuration")?;
    let client = AuthClient::new(config.provider()).context("building identity provider client")?;
    let sessions = session_handle(&config)?;
    let home_path = config.home_path().to_string();

    tracing::info!(
        authority = %config.provider().authority(),
        callback = config.callback_path(),
        "Login configured"
    );

    let app = Router::new()
        .route(&home_path, get(home))
        .with_state(sessions.clone())
        .merge(auth_routes(config, client, sessions));

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.into());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize tracing subscriber with environment filter
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("corp_login=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn session_handle(config: &LoginConfig) -> Result<SessionHandle> {
    let backend = std::env::var("SESSION_TYPE").unwrap_or_else(|_| "filesystem".into());
    match backend.as_str() {
        "filesystem" => {
            let dir = std::env::var("SESSION_DIR").unwrap_or_else(|_| DEFAULT_SESSION_DIR.into());
            tracing::info!(dir = %dir, "Using filesystem sessions");
            let store = FileSessionStore::new(dir)
                .with_ttl(config.session_ttl())
                .with_max_entries(config.max_sessions());
            Ok(SessionHandle::new(store, config))
        }
        "memory" => {
            let store = MemorySessionStore::new()
                .with_ttl(config.session_ttl())
                .with_max_entries(config.max_sessions());
            Ok(SessionHandle::new(store, config))
        }
        other => bail!("SESSION_TYPE must be \"filesystem\" or \"memory\", got {other:?}"),
    }
}

async fn home(
    State(sessions): State<SessionHandle>,
    headers: HeaderMap,
) -> Result<String, AuthError> {
    let mut body = String::new();

    let Some((session_id, mut session)) = sessions.resolve(&headers).await? else {
        body.push_str("Not signed in. Visit /login to sign in.\n");
        return Ok(body);
    };

    let notices = session.take_notices();
    if !notices.is_empty() {
        sessions.save(&session_id, &session).await?;
    }
    for notice in &notices {
        body.push_str(&format!("[{}] {}\n", notice.level, notice.message));
    }

    match session.user() {
        Some(user) => body.push_str(&format!(
            "Signed in as {}. Visit /logout to sign out.\n",
            user.preferred_username().unwrap_or("<unknown>")
        )),
        None => body.push_str("Not signed in. Visit /login to sign in.\n"),
    }
    Ok(body)
}
