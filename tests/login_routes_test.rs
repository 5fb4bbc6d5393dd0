//! End-to-end tests for the login routes using wiremock
//!
//! Drives the Axum router with `tower::ServiceExt::oneshot` while a wiremock
//! server plays the identity provider's token endpoint:
//!
//! - `/login` stores the state and redirects to the authorize endpoint.
//! - The callback redeems the code only when the state matches.
//! - Provider and token-endpoint errors become notices, not error pages.
//! - `/logout` drops the session and redirects to the provider.

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Request, Response, StatusCode};
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use corp_login::middleware::{AuthUser, LoginConfig, SessionHandle, auth_routes};
use corp_login::{AuthClient, FileSessionStore, MemorySessionStore, ProviderConfig, SessionStore};

const COOKIE_NAME: &str = "__corp_session";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn login_config(server: &MockServer) -> LoginConfig {
    let provider = ProviderConfig::new(
        "test-client",
        "test-secret",
        format!("{}/tenant", server.uri()).parse().unwrap(),
        "http://app.test/getAToken".parse().unwrap(),
    )
    .with_scopes(vec!["User.Read".into()]);
    LoginConfig::new(provider)
}

async fn me(user: AuthUser) -> String {
    user.claims
        .preferred_username()
        .unwrap_or_default()
        .to_string()
}

async fn notices(State(sessions): State<SessionHandle>, headers: HeaderMap) -> String {
    let Some((id, mut session)) = sessions.resolve(&headers).await.unwrap() else {
        return String::new();
    };
    let drained = session.take_notices();
    sessions.save(&id, &session).await.unwrap();
    drained
        .iter()
        .map(|n| format!("{}: {}", n.level, n.message))
        .collect::<Vec<_>>()
        .join("\n")
}

fn app_with<S: SessionStore>(server: &MockServer, store: S) -> Router {
    let config = login_config(server);
    let client = AuthClient::new(config.provider()).unwrap();
    let sessions = SessionHandle::new(store, &config);

    Router::new()
        .route("/me", get(me))
        .route("/notices", get(notices))
        .with_state(sessions.clone())
        .merge(auth_routes(config, client, sessions))
}

fn app(server: &MockServer) -> Router {
    app_with(server, MemorySessionStore::new())
}

async fn get_with_cookie(app: &Router, uri: &str, cookie: Option<&str>) -> Response<Body> {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(COOKIE, cookie);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(LOCATION)
        .expect("redirect location")
        .to_str()
        .unwrap()
        .to_string()
}

/// `name=value` pair of the session cookie set by the response.
fn session_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{COOKIE_NAME}=")))
        .and_then(|v| v.split(';').next())
        .expect("session cookie")
        .to_string()
}

fn query_param(url: &str, key: &str) -> Option<String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn id_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

fn token_response_body() -> serde_json::Value {
    serde_json::json!({
        "access_token": "t",
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": "r",
        "scope": "User.Read openid profile offline_access",
        "id_token": id_token(serde_json::json!({
            "preferred_username": "a@b.com",
            "oid": "object-1",
            "tid": "tenant-1",
        })),
    })
}

/// Runs `/login` and returns `(cookie, state)`.
async fn start_login(app: &Router) -> (String, String) {
    let response = get_with_cookie(app, "/login", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookie = session_cookie(&response);
    let state = query_param(&location(&response), "state").expect("state in authorize URL");
    (cookie, state)
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_redirects_to_authorize_endpoint() {
    let server = MockServer::start().await;
    let app = app(&server);

    let response = get_with_cookie(&app, "/login", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location(&response);
    assert!(target.starts_with(&format!("{}/tenant/oauth2/v2.0/authorize?", server.uri())));
    assert_eq!(query_param(&target, "client_id").as_deref(), Some("test-client"));
    assert_eq!(
        query_param(&target, "redirect_uri").as_deref(),
        Some("http://app.test/getAToken")
    );
    assert_eq!(
        query_param(&target, "scope").as_deref(),
        Some("User.Read openid profile offline_access")
    );
    assert_eq!(query_param(&target, "state").unwrap().len(), 22);
    assert!(!session_cookie(&response).is_empty());
}

#[tokio::test]
async fn test_each_login_issues_new_state() {
    let server = MockServer::start().await;
    let app = app(&server);

    let (cookie, first) = start_login(&app).await;
    let response = get_with_cookie(&app, "/login", Some(&cookie)).await;
    let second = query_param(&location(&response), "state").unwrap();

    assert_ne!(first, second);
}

#[tokio::test]
async fn test_anonymous_logins_are_bounded_by_store_capacity() {
    let server = MockServer::start().await;
    let store = MemorySessionStore::new().with_max_entries(10);
    let app = app_with(&server, store.clone());

    for _ in 0..30 {
        let response = get_with_cookie(&app, "/login", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    assert_eq!(store.len().await, 10);
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_successful_callback_signs_user_in() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=CODE1"))
        .and(body_string_contains("client_secret=test-secret"))
        .and(body_string_contains(
            "redirect_uri=http%3A%2F%2Fapp.test%2FgetAToken",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .expect(1)
        .mount(&server)
        .await;
    let app = app(&server);

    let (cookie, state) = start_login(&app).await;
    let response = get_with_cookie(
        &app,
        &format!("/getAToken?state={state}&code=CODE1&session_state=x"),
        Some(&cookie),
    )
    .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    let response = get_with_cookie(&app, "/me", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "a@b.com");

    let response = get_with_cookie(&app, "/notices", Some(&cookie)).await;
    assert_eq!(body_text(response).await, "success: Login successful!");
}

#[tokio::test]
async fn test_state_mismatch_never_calls_token_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .expect(0)
        .mount(&server)
        .await;
    let app = app(&server);

    let (cookie, _state) = start_login(&app).await;
    let response =
        get_with_cookie(&app, "/getAToken?state=xyz&code=CODE1", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    let response = get_with_cookie(&app, "/me", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_without_session_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .expect(0)
        .mount(&server)
        .await;
    let app = app(&server);

    let response = get_with_cookie(&app, "/getAToken?code=CODE1", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    assert!(response.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_repeated_state_parameter_redirects_home() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .expect(0)
        .mount(&server)
        .await;
    let app = app(&server);

    let (cookie, _state) = start_login(&app).await;
    let response =
        get_with_cookie(&app, "/getAToken?state=a&state=b&code=CODE1", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    let response = get_with_cookie(&app, "/me", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_provider_error_shows_notice() {
    let server = MockServer::start().await;
    let app = app(&server);

    let (cookie, state) = start_login(&app).await;
    let response = get_with_cookie(
        &app,
        &format!("/getAToken?state={state}&error=access_denied&error_description=User+declined"),
        Some(&cookie),
    )
    .await;

    assert_eq!(location(&response), "/");

    let response = get_with_cookie(&app, "/me", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get_with_cookie(&app, "/notices", Some(&cookie)).await;
    assert_eq!(
        body_text(response).await,
        "danger: Login failed. Please try again."
    );
}

#[tokio::test]
async fn test_token_endpoint_error_shows_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "AADSTS70008: code expired",
        })))
        .expect(1)
        .mount(&server)
        .await;
    let app = app(&server);

    let (cookie, state) = start_login(&app).await;
    let response = get_with_cookie(
        &app,
        &format!("/getAToken?state={state}&code=OLD"),
        Some(&cookie),
    )
    .await;
    assert_eq!(location(&response), "/");

    let response = get_with_cookie(&app, "/me", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get_with_cookie(&app, "/notices", Some(&cookie)).await;
    assert_eq!(
        body_text(response).await,
        "danger: Login failed during token acquisition: AADSTS70008: code expired"
    );
}

#[tokio::test]
async fn test_callback_state_is_single_use() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .expect(1)
        .mount(&server)
        .await;
    let app = app(&server);

    let (cookie, state) = start_login(&app).await;
    let callback = format!("/getAToken?state={state}&code=CODE1");
    get_with_cookie(&app, &callback, Some(&cookie)).await;
    let replay = get_with_cookie(&app, &callback, Some(&cookie)).await;

    assert_eq!(replay.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&replay), "/");
}

// ---------------------------------------------------------------------------
// Logout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_logout_clears_session_and_redirects_to_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .mount(&server)
        .await;
    let app = app(&server);

    let (cookie, state) = start_login(&app).await;
    get_with_cookie(
        &app,
        &format!("/getAToken?state={state}&code=CODE1"),
        Some(&cookie),
    )
    .await;

    let response = get_with_cookie(&app, "/logout", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let target = location(&response);
    assert!(target.starts_with(&format!("{}/tenant/oauth2/v2.0/logout?", server.uri())));
    assert_eq!(
        query_param(&target, "post_logout_redirect_uri").as_deref(),
        Some("http://app.test/")
    );

    let response = get_with_cookie(&app, "/me", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_without_session_still_redirects() {
    let server = MockServer::start().await;
    let app = app(&server);

    let response = get_with_cookie(&app, "/logout", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).contains("post_logout_redirect_uri="));
}

// ---------------------------------------------------------------------------
// Filesystem sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_filesystem_sessions_persist_token_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response_body()))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let store = FileSessionStore::new(dir.path());
    let app = app_with(&server, store.clone());

    let (cookie, state) = start_login(&app).await;
    get_with_cookie(
        &app,
        &format!("/getAToken?state={state}&code=CODE1"),
        Some(&cookie),
    )
    .await;

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .collect();
    assert_eq!(files.len(), 1);

    let raw = std::fs::read_to_string(files[0].path()).unwrap();
    let session: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(session["user"]["preferred_username"], "a@b.com");

    let cache: serde_json::Value =
        serde_json::from_str(session["token_cache"].as_str().unwrap()).unwrap();
    assert_eq!(cache["tokens"]["object-1.tenant-1"]["access_token"], "t");
    assert_eq!(cache["tokens"]["object-1.tenant-1"]["refresh_token"], "r");
}
