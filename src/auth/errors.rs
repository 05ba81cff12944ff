//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::cookie::SessionCookies;

/// Machine-readable code for an expired access token. The only failure a client may recover from by refreshing.
pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";

/// Machine-readable code for an idle session. Requires a fresh login.
pub const INACTIVITY_TIMEOUT: &str = "INACTIVITY_TIMEOUT";

/// Machine-readable code for a valid identity lacking a permission.
pub const FORBIDDEN: &str = "FORBIDDEN";

/// Internal auth error kind used by the core authentication logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// No credential presented
    Missing,
    /// Malformed, tampered, or wrong-kind credential
    Invalid,
    /// Access token past its expiry
    TokenExpired,
    /// Activity marker missing or older than the window
    InactivityTimeout,
    /// Refresh token missing, invalid, or expired
    RefreshFailed,
    /// Login with an unknown username or wrong password
    BadCredentials,
    /// Authenticated but lacking a permission
    Forbidden,
    /// Clock or signing failure
    Internal,
}

impl AuthErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthErrorKind::Missing
            | AuthErrorKind::Invalid
            | AuthErrorKind::TokenExpired
            | AuthErrorKind::InactivityTimeout
            | AuthErrorKind::RefreshFailed
            | AuthErrorKind::BadCredentials => StatusCode::UNAUTHORIZED,
            AuthErrorKind::Forbidden => StatusCode::FORBIDDEN,
            AuthErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Missing and invalid credentials share a message so callers cannot tell them apart.
    pub fn message(&self) -> &'static str {
        match self {
            AuthErrorKind::Missing | AuthErrorKind::Invalid => "Not authenticated",
            AuthErrorKind::TokenExpired => "Access token expired",
            AuthErrorKind::InactivityTimeout => "Session expired due to inactivity",
            AuthErrorKind::RefreshFailed => "Session expired",
            AuthErrorKind::BadCredentials => "Invalid username or password",
            AuthErrorKind::Forbidden => "Insufficient permissions",
            AuthErrorKind::Internal => "Internal error",
        }
    }

    pub fn code(&self) -> Option<&'static str> {
        match self {
            AuthErrorKind::TokenExpired => Some(TOKEN_EXPIRED),
            AuthErrorKind::InactivityTimeout => Some(INACTIVITY_TIMEOUT),
            AuthErrorKind::Forbidden => Some(FORBIDDEN),
            _ => None,
        }
    }

    /// Terminal failures wipe every session cookie before responding.
    /// An expired access token keeps the refresh cookie so the client can recover.
    pub fn clears_session(&self) -> bool {
        !matches!(
            self,
            AuthErrorKind::TokenExpired | AuthErrorKind::Forbidden | AuthErrorKind::Internal
        )
    }
}

/// Guard rejection: JSON `{error, code?}` plus any cookie removals.
#[derive(Debug)]
pub struct SessionRejection {
    pub kind: AuthErrorKind,
    pub(super) cookies: SessionCookies,
}

impl SessionRejection {
    pub(super) fn new(kind: AuthErrorKind, cookies: SessionCookies) -> Self {
        Self { kind, cookies }
    }
}

#[derive(Serialize)]
pub(crate) struct AuthErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        (
            self.kind.status_code(),
            self.cookies,
            Json(AuthErrorBody {
                error: self.kind.message(),
                code: self.kind.code(),
            }),
        )
            .into_response()
    }
}
