//! Axum extractors for authentication.
//!
//! All three guards share one decision core: find the credential, verify it,
//! then check the activity marker. Inactivity always wins over a token that
//! is still cryptographically valid. On success the marker slides forward.

use std::cell::RefCell;
use std::marker::PhantomData;

use axum::{
    extract::{FromRequestParts, Request},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};

use super::cookie::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, SessionCookies, get_cookie};
use super::errors::{AuthErrorKind, SessionRejection};
use super::permissions::{Permission, has_permission};
use super::state::{HasSessionBackend, SessionBackend};
use super::types::{AuthenticatedUser, RefreshSession, Verification};
use crate::jwt::{AccessClaims, JwtConfig, RefreshClaims, unix_now};

tokio::task_local! {
    /// Task-local storage for cookies written by the guards.
    /// Used to pass them from the extractor to the response middleware.
    pub static PENDING_SESSION_COOKIES: RefCell<SessionCookies>;
}

/// Middleware that attaches guard-written cookies (activity touches) to the response.
/// Cookies the handler set itself, such as removals on a failed refresh, are left alone.
pub async fn apply_session_cookies(request: Request, next: Next) -> Response {
    PENDING_SESSION_COOKIES
        .scope(RefCell::new(SessionCookies::new()), async move {
            let mut response = next.run(request).await;
            let pending = PENDING_SESSION_COOKIES.with(|cell| cell.take());
            pending.append_missing_to(response.headers_mut());
            response
        })
        .await
}

fn queue_cookies(cookies: SessionCookies) {
    let queued = PENDING_SESSION_COOKIES.try_with(|cell| {
        let mut pending = cell.borrow_mut();
        for cookie in cookies.iter() {
            pending.push(cookie.to_string());
        }
    });
    if queued.is_err() {
        warn!("Session cookie dropped: apply_session_cookies layer is not installed");
    }
}

/// Token from `Authorization: Bearer`, if the header carries one.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Access token from the Authorization header, falling back to the access cookie.
pub fn access_token(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| get_cookie(headers, ACCESS_COOKIE_NAME))
}

pub fn verify_access(headers: &HeaderMap, jwt: &JwtConfig) -> Verification<AccessClaims> {
    match access_token(headers) {
        None => Verification::Missing,
        Some(token) => jwt.verify_access(token).into(),
    }
}

/// Refresh tokens are only ever read from their cookie.
pub fn verify_refresh(headers: &HeaderMap, jwt: &JwtConfig) -> Verification<RefreshClaims> {
    match get_cookie(headers, REFRESH_COOKIE_NAME) {
        None => Verification::Missing,
        Some(token) => jwt.verify_refresh(token).into(),
    }
}

impl<C> From<Result<C, crate::jwt::VerifyError>> for Verification<C> {
    fn from(result: Result<C, crate::jwt::VerifyError>) -> Self {
        use crate::jwt::VerifyError;
        match result {
            Ok(claims) => Verification::Valid(claims),
            Err(VerifyError::Expired) => Verification::Expired,
            Err(VerifyError::Invalid) => Verification::Invalid,
        }
    }
}

fn ensure_active(
    headers: &HeaderMap,
    session: &SessionBackend,
    now: u64,
) -> Result<(), AuthErrorKind> {
    let marker = session.activity.read(headers);
    if session.activity.is_stale(marker, now) {
        return Err(AuthErrorKind::InactivityTimeout);
    }
    Ok(())
}

/// Decide on an access-token request. Expiry is reported before staleness so
/// clients can tell a refreshable session from an idle one.
pub fn authorize_access(
    headers: &HeaderMap,
    session: &SessionBackend,
    now: u64,
) -> Result<AccessClaims, AuthErrorKind> {
    let claims = match verify_access(headers, &session.jwt) {
        Verification::Valid(claims) => claims,
        Verification::Missing => return Err(AuthErrorKind::Missing),
        Verification::Invalid => return Err(AuthErrorKind::Invalid),
        Verification::Expired => return Err(AuthErrorKind::TokenExpired),
    };
    ensure_active(headers, session, now)?;
    Ok(claims)
}

/// Decide on a refresh request. An idle session cannot extend itself.
pub fn authorize_refresh(
    headers: &HeaderMap,
    session: &SessionBackend,
    now: u64,
) -> Result<RefreshClaims, AuthErrorKind> {
    let claims = match verify_refresh(headers, &session.jwt) {
        Verification::Valid(claims) => claims,
        Verification::Missing => return Err(refresh_failed("missing")),
        Verification::Invalid => return Err(refresh_failed("invalid")),
        Verification::Expired => return Err(refresh_failed("expired")),
    };
    ensure_active(headers, session, now)?;
    Ok(claims)
}

fn refresh_failed(reason: &'static str) -> AuthErrorKind {
    debug!(reason, "Refresh token not usable");
    AuthErrorKind::RefreshFailed
}

/// Build the rejection for `kind`, clearing every session cookie on terminal failures.
pub fn reject(session: &SessionBackend, kind: AuthErrorKind) -> SessionRejection {
    let mut cookies = SessionCookies::new();
    if kind.clears_session() {
        session.activity.clear(&mut cookies);
    }
    SessionRejection::new(kind, cookies)
}

fn current_time(session: &SessionBackend) -> Result<u64, SessionRejection> {
    unix_now().map_err(|e| {
        error!(error = %e, "Failed to read clock");
        reject(session, AuthErrorKind::Internal)
    })
}

/// Slide the activity marker forward for this request.
pub(crate) fn touch_activity(session: &SessionBackend, now: u64) -> Result<(), SessionRejection> {
    let mut cookies = SessionCookies::new();
    session.activity.touch(&mut cookies, now).map_err(|e| {
        error!(error = %e, "Failed to sign activity marker");
        reject(session, AuthErrorKind::Internal)
    })?;
    queue_cookies(cookies);
    Ok(())
}

fn admit<C>(
    session: &SessionBackend,
    decision: Result<C, AuthErrorKind>,
    now: u64,
) -> Result<C, SessionRejection> {
    match decision {
        Ok(claims) => {
            touch_activity(session, now)?;
            Ok(claims)
        }
        Err(kind) => {
            debug!(reason = ?kind, "Rejected session");
            Err(reject(session, kind))
        }
    }
}

// =============================================================================
// Extractors
// =============================================================================

/// Extractor for endpoints that require an authenticated, active session.
pub struct RequireAuth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: HasSessionBackend + Send + Sync,
{
    type Rejection = SessionRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = state.session();
        let now = current_time(session)?;
        let claims = admit(session, authorize_access(&parts.headers, session, now), now)?;
        Ok(RequireAuth(AuthenticatedUser { claims }))
    }
}

/// Optional authentication extractor - never fails, returns Option<AuthenticatedUser>.
/// Useful for endpoints whose behavior varies with identity without requiring it.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: HasSessionBackend + Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = state.session();
        let Ok(now) = unix_now() else {
            return Ok(OptionalAuth(None));
        };

        let user = match authorize_access(&parts.headers, session, now) {
            Ok(claims) => touch_activity(session, now)
                .ok()
                .map(|_| AuthenticatedUser { claims }),
            Err(_) => None,
        };
        Ok(OptionalAuth(user))
    }
}

/// Extractor for the refresh endpoint: a valid refresh cookie on an active session.
pub struct RequireRefreshToken(pub RefreshSession);

impl<S> FromRequestParts<S> for RequireRefreshToken
where
    S: HasSessionBackend + Send + Sync,
{
    type Rejection = SessionRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = state.session();
        let now = current_time(session)?;
        let claims = admit(session, authorize_refresh(&parts.headers, session, now), now)?;
        Ok(RequireRefreshToken(RefreshSession { claims }))
    }
}

/// `RequireAuth` plus a capability check for `P`.
pub struct RequirePermission<P: Permission>(pub AuthenticatedUser, pub PhantomData<P>);

impl<S, P> FromRequestParts<S> for RequirePermission<P>
where
    S: HasSessionBackend + Send + Sync,
    P: Permission + Send,
{
    type Rejection = SessionRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequireAuth(user) = RequireAuth::from_request_parts(parts, state).await?;

        if !has_permission(&user.claims, P::NAME) {
            debug!(subject = %user.claims.sub, permission = P::NAME, "Permission denied");
            return Err(reject(state.session(), AuthErrorKind::Forbidden));
        }

        Ok(RequirePermission(user, PhantomData))
    }
}
