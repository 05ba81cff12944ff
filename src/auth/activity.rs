//! Inactivity tracking through a signed, sliding `last_activity` cookie.
//!
//! The marker is independent of token expiry: a stale or missing marker
//! invalidates an otherwise valid access or refresh token.

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::cookie::{
    ACCESS_COOKIE_NAME, ACTIVITY_COOKIE_NAME, CookiePolicy, REFRESH_COOKIE_NAME, SessionCookies,
    get_cookie,
};
use crate::jwt::JwtError;

/// Default inactivity window: 30 minutes
pub const DEFAULT_INACTIVITY_SECS: u64 = 30 * 60;

#[derive(Serialize, Deserialize)]
struct ActivityMarker {
    /// Last authorized request (Unix seconds)
    seen: u64,
}

#[derive(Clone)]
pub struct ActivityTracker {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    window_secs: u64,
    policy: CookiePolicy,
}

impl ActivityTracker {
    pub fn new(secret: &[u8], window_secs: u64, policy: CookiePolicy) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            window_secs,
            policy,
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn policy(&self) -> CookiePolicy {
        self.policy
    }

    /// Signed marker value recording activity at `now`.
    pub fn marker_at(&self, now: u64) -> Result<String, JwtError> {
        jsonwebtoken::encode(
            &Header::default(),
            &ActivityMarker { seen: now },
            &self.encoding_key,
        )
        .map_err(JwtError::Encoding)
    }

    /// Slide the marker forward to `now`, with the window as its cookie lifetime.
    pub fn touch(&self, cookies: &mut SessionCookies, now: u64) -> Result<(), JwtError> {
        let marker = self.marker_at(now)?;
        cookies.push(self.policy.set(ACTIVITY_COOKIE_NAME, &marker, self.window_secs));
        Ok(())
    }

    /// Read the marker timestamp. Missing, unsigned, or non-numeric markers read as `None`.
    pub fn read(&self, headers: &HeaderMap) -> Option<u64> {
        let raw = get_cookie(headers, ACTIVITY_COOKIE_NAME)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        jsonwebtoken::decode::<ActivityMarker>(raw, &self.decoding_key, &validation)
            .ok()
            .map(|data| data.claims.seen)
    }

    pub fn is_stale(&self, marker: Option<u64>, now: u64) -> bool {
        match marker {
            None => true,
            Some(seen) => now.saturating_sub(seen) > self.window_secs,
        }
    }

    /// Remove the marker together with both credentials, in one response.
    pub fn clear(&self, cookies: &mut SessionCookies) {
        cookies.push(self.policy.clear(ACTIVITY_COOKIE_NAME));
        cookies.push(self.policy.clear(ACCESS_COOKIE_NAME));
        cookies.push(self.policy.clear(REFRESH_COOKIE_NAME));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header};

    const NOW: u64 = 1_700_000_000;

    fn tracker() -> ActivityTracker {
        ActivityTracker::new(
            b"test-cookie-secret",
            DEFAULT_INACTIVITY_SECS,
            CookiePolicy::default(),
        )
    }

    fn headers_with(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn test_touch_then_read() {
        let tracker = tracker();
        let mut cookies = SessionCookies::new();
        tracker.touch(&mut cookies, NOW).unwrap();

        let set_cookie = cookies.iter().next().unwrap();
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains(&format!("Max-Age={}", DEFAULT_INACTIVITY_SECS)));

        let pair = set_cookie.split(';').next().unwrap();
        assert_eq!(tracker.read(&headers_with(pair)), Some(NOW));
    }

    #[test]
    fn test_missing_marker_is_stale() {
        let tracker = tracker();
        assert_eq!(tracker.read(&HeaderMap::new()), None);
        assert!(tracker.is_stale(None, NOW));
    }

    #[test]
    fn test_forged_marker_reads_as_missing() {
        let forger = ActivityTracker::new(
            b"some-other-secret",
            DEFAULT_INACTIVITY_SECS,
            CookiePolicy::default(),
        );
        let forged = forger.marker_at(NOW).unwrap();

        let cookie = format!("{}={}", ACTIVITY_COOKIE_NAME, forged);
        assert_eq!(tracker().read(&headers_with(&cookie)), None);
    }

    #[test]
    fn test_plain_timestamp_reads_as_missing() {
        let cookie = format!("{}={}", ACTIVITY_COOKIE_NAME, NOW);
        assert_eq!(tracker().read(&headers_with(&cookie)), None);
    }

    #[test]
    fn test_non_numeric_marker_reads_as_missing() {
        let key = EncodingKey::from_secret(b"test-cookie-secret");
        let token = jsonwebtoken::encode(
            &Header::default(),
            &serde_json::json!({ "seen": "yesterday" }),
            &key,
        )
        .unwrap();

        let cookie = format!("{}={}", ACTIVITY_COOKIE_NAME, token);
        assert_eq!(tracker().read(&headers_with(&cookie)), None);
    }

    #[test]
    fn test_staleness_boundary() {
        let tracker = tracker();
        let window = DEFAULT_INACTIVITY_SECS;

        assert!(!tracker.is_stale(Some(NOW), NOW));
        assert!(!tracker.is_stale(Some(NOW - window), NOW));
        assert!(tracker.is_stale(Some(NOW - window - 1), NOW));
        assert!(!tracker.is_stale(Some(NOW + 5), NOW));
    }

    #[test]
    fn test_clear_removes_all_three_cookies() {
        let tracker = tracker();
        let mut cookies = SessionCookies::new();
        tracker.touch(&mut cookies, NOW).unwrap();
        tracker.clear(&mut cookies);

        let all: Vec<&str> = cookies.iter().collect();
        assert_eq!(all.len(), 3);
        for name in [ACTIVITY_COOKIE_NAME, ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME] {
            assert!(
                all.iter()
                    .any(|c| c.starts_with(&format!("{}=;", name)) && c.contains("Max-Age=0")),
                "{} should be cleared",
                name
            );
        }
    }
}
