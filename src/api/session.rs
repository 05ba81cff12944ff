//! Session API endpoints.
//!
//! - POST `/login` - Check credentials, set access, refresh, and activity cookies
//! - POST `/refresh` - Exchange a refresh cookie for a new access token
//! - POST `/logout` - Clear every session cookie
//! - GET `/me` - Identity behind the current access token

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::{ApiError, ResultExt};
use crate::auth::{
    ACCESS_COOKIE_NAME, AuthErrorKind, OptionalAuth, REFRESH_COOKIE_NAME, RequireAuth,
    RequireRefreshToken, SessionBackend, SessionCookies, reject,
};
use crate::impl_has_session_backend;
use crate::jwt::{Identity, unix_now};
use crate::rate_limit::{RateLimitConfig, rate_limit_login};
use crate::users::{UserDirectory, authenticate};

#[derive(Clone)]
pub struct SessionState {
    pub session: SessionBackend,
    pub users: Arc<dyn UserDirectory>,
}

impl_has_session_backend!(SessionState);

pub fn router(state: SessionState, limits: Arc<RateLimitConfig>) -> Router {
    let login_routes = Router::new()
        .route("/login", post(login))
        .route_layer(middleware::from_fn_with_state(limits, rate_limit_login))
        .with_state(state.clone());

    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_state(state)
        .merge(login_routes)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Public view of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl From<Identity> for UserInfo {
    fn from(identity: Identity) -> Self {
        Self {
            username: identity.subject,
            roles: identity.roles,
            permissions: identity.permissions,
        }
    }
}

/// Body returned by login and refresh. The token is also set as a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Serialize)]
struct LogoutResponse {
    success: bool,
}

async fn login(
    State(state): State<SessionState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.username.is_empty() || body.password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required"));
    }

    let user = authenticate(state.users.as_ref(), &body.username, &body.password)
        .await
        .internal_err("Failed to look up user")?;
    let Some(user) = user else {
        info!(username = %body.username, "Login rejected");
        return Err(reject(&state.session, AuthErrorKind::BadCredentials).into());
    };

    let identity = user.identity();
    let now = unix_now().internal_err("Failed to read clock")?;
    let access = state
        .session
        .jwt
        .issue_access_at(&identity, now)
        .internal_err("Failed to issue access token")?;
    let refresh = state
        .session
        .jwt
        .issue_refresh_at(&identity, now)
        .internal_err("Failed to issue refresh token")?;

    let policy = state.session.cookie_policy();
    let mut cookies = SessionCookies::new();
    cookies.push(policy.set(ACCESS_COOKIE_NAME, &access.token, access.duration));
    cookies.push(policy.set(REFRESH_COOKIE_NAME, &refresh.token, refresh.duration));
    state
        .session
        .activity
        .touch(&mut cookies, now)
        .internal_err("Failed to sign activity marker")?;

    info!(username = %identity.subject, "Logged in");
    Ok((
        StatusCode::OK,
        cookies,
        Json(SessionResponse {
            token: access.token,
            user: identity.into(),
        }),
    ))
}

/// Roles come from the refresh claims. Permissions are re-read so revocations
/// take effect at the next refresh.
async fn refresh(
    State(state): State<SessionState>,
    RequireRefreshToken(session): RequireRefreshToken,
) -> Result<impl IntoResponse, ApiError> {
    let claims = session.claims;
    let user = state
        .users
        .find(&claims.sub)
        .await
        .internal_err("Failed to look up user")?;
    let Some(user) = user else {
        warn!(subject = %claims.sub, "Refresh for a user no longer in the directory");
        return Err(reject(&state.session, AuthErrorKind::RefreshFailed).into());
    };

    let identity = Identity {
        subject: claims.sub,
        roles: claims.roles,
        permissions: user.permissions,
    };
    let access = state
        .session
        .jwt
        .issue_access(&identity)
        .internal_err("Failed to issue access token")?;

    let mut cookies = SessionCookies::new();
    cookies.push(
        state
            .session
            .cookie_policy()
            .set(ACCESS_COOKIE_NAME, &access.token, access.duration),
    );

    info!(subject = %identity.subject, "Access token refreshed");
    Ok((
        StatusCode::OK,
        cookies,
        Json(SessionResponse {
            token: access.token,
            user: identity.into(),
        }),
    ))
}

/// Always succeeds, with or without a live session.
async fn logout(
    State(state): State<SessionState>,
    OptionalAuth(user): OptionalAuth,
) -> impl IntoResponse {
    if let Some(user) = user {
        info!(subject = %user.claims.sub, "Logged out");
    }

    let mut cookies = SessionCookies::new();
    state.session.activity.clear(&mut cookies);
    (StatusCode::OK, cookies, Json(LogoutResponse { success: true }))
}

async fn me(RequireAuth(user): RequireAuth) -> Json<UserInfo> {
    Json(user.claims.identity().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_info_from_identity() {
        let info = UserInfo::from(Identity {
            subject: "alice".to_string(),
            roles: vec!["member".to_string()],
            permissions: vec!["reports:read".to_string()],
        });

        assert_eq!(info.username, "alice");
        assert_eq!(info.roles, vec!["member"]);
        assert_eq!(info.permissions, vec!["reports:read"]);
    }

    #[test]
    fn test_session_response_shape() {
        let body = serde_json::to_value(SessionResponse {
            token: "t".to_string(),
            user: UserInfo {
                username: "alice".to_string(),
                roles: vec![],
                permissions: vec![],
            },
        })
        .unwrap();

        assert_eq!(body["token"], "t");
        assert_eq!(body["user"]["username"], "alice");
    }
}
