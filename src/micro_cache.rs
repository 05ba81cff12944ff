//! Short-lived server-side response cache for business routes.
//!
//! Only successful `GET` responses without cookies are stored. The key carries
//! the verified subject (or `anon`) so one identity's response is never served
//! to another. Successful mutations invalidate every entry under their path.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::auth::{SessionBackend, authorize_access, touch_activity};
use crate::impl_has_session_backend;
use crate::jwt::unix_now;
use crate::ttl_map::TtlMap;

/// Responses larger than this are passed through uncached.
pub const DEFAULT_MAX_BODY_BYTES: usize = 256 * 1024;

const ANONYMOUS: &str = "anon";

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        if let Some(content_type) = self.content_type {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
        }
        response
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<Mutex<TtlMap<CachedResponse>>>,
    ttl: Duration,
    max_body_bytes: usize,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(TtlMap::new(capacity))),
            ttl,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn lock(&self) -> MutexGuard<'_, TtlMap<CachedResponse>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        self.lock().get(key, Instant::now())
    }

    pub fn put(&self, key: String, response: CachedResponse) {
        self.lock().insert(key, response, self.ttl, Instant::now());
    }

    pub fn invalidate(&self, pattern: &str) -> usize {
        self.lock().invalidate(pattern)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Clone)]
pub struct MicroCacheState {
    pub cache: ResponseCache,
    pub session: SessionBackend,
}

impl_has_session_backend!(MicroCacheState);

/// Cache key: method, full URI, and who is asking.
pub fn cache_key(method: &Method, uri: &str, identity: Option<&str>) -> String {
    format!("{} {} {}", method, uri, identity.unwrap_or(ANONYMOUS))
}

/// Middleware serving and storing cached `GET` responses.
pub async fn micro_cache(
    State(state): State<MicroCacheState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        let path = request.uri().path().to_string();
        let response = next.run(request).await;
        if response.status().is_success() {
            let dropped = state.cache.invalidate(&path);
            if dropped > 0 {
                debug!(path = %path, dropped, "Invalidated cached responses");
            }
        }
        return response;
    }

    let now = unix_now().ok();
    let subject = now.and_then(|now| {
        authorize_access(request.headers(), &state.session, now)
            .ok()
            .map(|claims| claims.sub)
    });
    let key = cache_key(request.method(), &request.uri().to_string(), subject.as_deref());

    if let Some(hit) = state.cache.get(&key) {
        // A hit skips the handler's guard, so the marker is slid here instead.
        if let (Some(_), Some(now)) = (&subject, now) {
            if let Err(rejection) = touch_activity(&state.session, now) {
                return rejection.into_response();
            }
        }
        debug!(key = %key, "Served cached response");
        return hit.into_response();
    }

    let response = next.run(request).await;
    if !response.status().is_success() || response.headers().contains_key(header::SET_COOKIE) {
        return response;
    }

    let cacheable = response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|len| len <= state.cache.max_body_bytes as u64);
    if !cacheable {
        return response;
    }

    let (parts, body) = response.into_parts();
    match axum::body::to_bytes(body, state.cache.max_body_bytes).await {
        Ok(bytes) => {
            state.cache.put(
                key,
                CachedResponse {
                    status: parts.status,
                    content_type: parts.headers.get(header::CONTENT_TYPE).cloned(),
                    body: bytes.clone(),
                },
            );
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            warn!(error = %e, "Failed to buffer response for caching");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
