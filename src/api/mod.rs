mod error;
mod session;

use axum::Router;
use std::sync::Arc;

use crate::auth::SessionBackend;
use crate::rate_limit::RateLimitConfig;
use crate::users::UserDirectory;

pub use error::{ApiError, ResultExt};
pub use session::{LoginRequest, SessionResponse, SessionState, UserInfo};

/// Create the API router.
pub fn create_api_router(
    session: SessionBackend,
    users: Arc<dyn UserDirectory>,
    limits: Arc<RateLimitConfig>,
) -> Router {
    let session_state = SessionState { session, users };

    Router::new().nest("/auth", session::router(session_state, limits))
}
