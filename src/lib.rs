pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod jwt;
pub mod micro_cache;
pub mod rate_limit;
mod ttl_map;
pub mod users;

use api::create_api_router;
use auth::{ActivityTracker, CookiePolicy, SessionBackend, apply_session_cookies};
use axum::{Router, middleware};
use jwt::{JwtConfig, JwtError, TokenLifetimes};
use micro_cache::{MicroCacheState, ResponseCache, micro_cache};
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::error;
use users::UserDirectory;

pub struct ServerConfig {
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens (must differ from the access secret)
    pub refresh_secret: Vec<u8>,
    /// Secret for signing the activity marker cookie
    pub cookie_secret: Vec<u8>,
    pub lifetimes: TokenLifetimes,
    /// Idle time after which a session must log in again
    pub inactivity_secs: u64,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    pub users: Arc<dyn UserDirectory>,
    pub rate_limit: RateLimitConfig,
    /// Short-lived cache in front of the application routes passed to `create_app_with`
    pub response_cache: Option<ResponseCache>,
}

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

/// Build the signer and activity tracker shared by every guard.
pub fn session_backend(config: &ServerConfig) -> Result<SessionBackend, JwtError> {
    let jwt = JwtConfig::new(
        &config.access_secret,
        &config.refresh_secret,
        config.lifetimes,
    )?;
    let activity = ActivityTracker::new(
        &config.cookie_secret,
        config.inactivity_secs,
        CookiePolicy::new(config.secure_cookies),
    );
    Ok(SessionBackend::new(jwt, activity))
}

/// Create the application router with only the session endpoints.
pub fn create_app(config: &ServerConfig) -> Result<Router, JwtError> {
    create_app_with(config, |_| Router::new())
}

/// Create the application router, merging in routes built by `routes`.
/// Those routes share the session backend, so they can use the guards, and
/// sit behind the response cache when one is configured.
pub fn create_app_with<F>(config: &ServerConfig, routes: F) -> Result<Router, JwtError>
where
    F: FnOnce(&SessionBackend) -> Router,
{
    let session = session_backend(config)?;

    let mut app_routes = routes(&session);
    if let Some(cache) = &config.response_cache {
        let cache_state = MicroCacheState {
            cache: cache.clone(),
            session: session.clone(),
        };
        app_routes = app_routes.layer(middleware::from_fn_with_state(cache_state, micro_cache));
    }

    let api_router = create_api_router(
        session,
        config.users.clone(),
        Arc::new(config.rate_limit.clone()),
    );

    Ok(Router::new()
        .merge(api_router)
        .merge(app_routes)
        .layer(middleware::from_fn(apply_session_cookies)))
}

/// Serve `app` on the given listener. This function blocks until the server exits.
pub async fn serve(app: Router, listener: TcpListener) -> Result<(), std::io::Error> {
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start `app` on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
pub async fn start_server(
    app: Router,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), ServerError> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = serve(app, listener).await {
            error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
