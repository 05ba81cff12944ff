#![allow(dead_code)]

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Response, header},
    middleware::{self, Next},
    routing::get,
};
use serde_json::{Value, json};
use sessionward::auth::{OptionalAuth, Permission, RequireAuth, RequirePermission, SessionBackend};
use sessionward::impl_has_session_backend;
use sessionward::jwt::{Identity, TokenLifetimes, unix_now};
use sessionward::micro_cache::ResponseCache;
use sessionward::rate_limit::RateLimitConfig;
use sessionward::users::MemoryDirectory;
use sessionward::{ServerConfig, create_app_with, session_backend};

pub const PASSWORD: &str = "correct horse battery staple";

/// Users shared by every test in a binary. Hashing once keeps tests fast.
pub fn users() -> Arc<MemoryDirectory> {
    static USERS: OnceLock<Arc<MemoryDirectory>> = OnceLock::new();
    USERS
        .get_or_init(|| {
            Arc::new(
                MemoryDirectory::new()
                    .with_user("alice", PASSWORD, &["member"], &["reports:read"])
                    .and_then(|d| d.with_user("bob", PASSWORD, &["member"], &[]))
                    .and_then(|d| d.with_user("root", PASSWORD, &["admin"], &[]))
                    .expect("Failed to hash test passwords"),
            )
        })
        .clone()
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        access_secret: b"test-access-secret-at-least-32-chars!!".to_vec(),
        refresh_secret: b"test-refresh-secret-at-least-32-chars!".to_vec(),
        cookie_secret: b"test-cookie-secret-at-least-32-chars!!".to_vec(),
        lifetimes: TokenLifetimes::default(),
        inactivity_secs: 30 * 60,
        secure_cookies: false,
        users: users(),
        rate_limit: RateLimitConfig::with_login_quota(
            Duration::from_millis(1),
            NonZeroU32::new(1000).unwrap(),
            false,
        ),
        response_cache: None,
    }
}

/// Backend with the same secrets as `test_config`, for minting test credentials.
pub fn backend() -> SessionBackend {
    session_backend(&test_config()).expect("Failed to build session backend")
}

pub fn identity(subject: &str, roles: &[&str], permissions: &[&str]) -> Identity {
    Identity {
        subject: subject.to_string(),
        roles: roles.iter().map(|s| s.to_string()).collect(),
        permissions: permissions.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn alice() -> Identity {
    identity("alice", &["member"], &["reports:read"])
}

pub fn now() -> u64 {
    unix_now().expect("Clock before Unix epoch")
}

// =============================================================================
// Application routes guarded by the session extractors
// =============================================================================

pub struct ReadReports;

impl Permission for ReadReports {
    const NAME: &'static str = "reports:read";
}

/// Request and handler counters observed by the test app.
#[derive(Default)]
pub struct Hits {
    pub profile_requests: AtomicUsize,
    pub refresh_requests: AtomicUsize,
    pub announcement_loads: AtomicUsize,
}

impl Hits {
    pub fn profile_requests(&self) -> usize {
        self.profile_requests.load(Ordering::SeqCst)
    }

    pub fn refresh_requests(&self) -> usize {
        self.refresh_requests.load(Ordering::SeqCst)
    }

    pub fn announcement_loads(&self) -> usize {
        self.announcement_loads.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct AppState {
    session: SessionBackend,
    hits: Arc<Hits>,
}

impl_has_session_backend!(AppState);

async fn profile(RequireAuth(user): RequireAuth) -> Json<Value> {
    Json(json!({ "username": user.claims.sub }))
}

async fn reports(RequirePermission(user, _): RequirePermission<ReadReports>) -> Json<Value> {
    Json(json!({ "owner": user.claims.sub, "reports": [] }))
}

async fn list_announcements(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
) -> Json<Value> {
    let load = state.hits.announcement_loads.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "viewer": user.map(|u| u.claims.sub),
        "load": load,
    }))
}

async fn post_announcement(RequireAuth(_user): RequireAuth) -> Json<Value> {
    Json(json!({ "ok": true }))
}

fn routes(session: &SessionBackend, hits: Arc<Hits>) -> Router {
    Router::new()
        .route("/api/profile", get(profile))
        .route("/api/reports", get(reports))
        .route(
            "/api/announcements",
            get(list_announcements).post(post_announcement),
        )
        .with_state(AppState {
            session: session.clone(),
            hits,
        })
}

async fn count_requests(
    State(hits): State<Arc<Hits>>,
    request: Request,
    next: Next,
) -> axum::response::Response {
    match request.uri().path() {
        "/api/profile" => {
            hits.profile_requests.fetch_add(1, Ordering::SeqCst);
        }
        "/auth/refresh" => {
            hits.refresh_requests.fetch_add(1, Ordering::SeqCst);
        }
        _ => {}
    }
    next.run(request).await
}

/// Full application: session endpoints plus the guarded test routes.
pub fn test_app_with(config: &ServerConfig) -> (Router, Arc<Hits>) {
    let hits = Arc::new(Hits::default());
    let route_hits = hits.clone();
    let app = create_app_with(config, move |session| routes(session, route_hits))
        .expect("Failed to build app")
        .layer(middleware::from_fn_with_state(hits.clone(), count_requests));
    (app, hits)
}

pub fn test_app() -> (Router, Arc<Hits>) {
    test_app_with(&test_config())
}

pub fn cached_test_app() -> (Router, Arc<Hits>) {
    let mut config = test_config();
    config.response_cache = Some(ResponseCache::new(64, Duration::from_secs(10)));
    test_app_with(&config)
}

/// Add the ConnectInfo the login rate limiter needs under `oneshot`.
pub fn with_client_addr(mut request: axum::http::Request<Body>) -> axum::http::Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    request
}

// =============================================================================
// Request and response helpers
// =============================================================================

pub fn login_request(username: &str, password: &str) -> axum::http::Request<Body> {
    with_client_addr(
        axum::http::Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "username": username, "password": password }).to_string(),
            ))
            .unwrap(),
    )
}

/// Request carrying an optional bearer token and the given cookies.
pub fn request(
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    cookies: &[(&str, &str)],
) -> axum::http::Request<Body> {
    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    if !cookies.is_empty() {
        let joined = cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header(header::COOKIE, joined);
    }
    with_client_addr(builder.body(Body::empty()).unwrap())
}

pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// The `Set-Cookie` line for `name`, if the response wrote one.
pub fn set_cookie<'a>(cookies: &'a [String], name: &str) -> Option<&'a str> {
    let prefix = format!("{}=", name);
    cookies
        .iter()
        .find(|c| c.starts_with(&prefix))
        .map(String::as_str)
}

/// Value of the `Set-Cookie` line for `name`.
pub fn set_cookie_value(cookies: &[String], name: &str) -> Option<String> {
    let line = set_cookie(cookies, name)?;
    let (_, rest) = line.split_once('=')?;
    Some(rest.split(';').next().unwrap_or("").to_string())
}

pub fn is_cleared(cookies: &[String], name: &str) -> bool {
    set_cookie(cookies, name).is_some_and(|c| c.contains("Max-Age=0"))
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
