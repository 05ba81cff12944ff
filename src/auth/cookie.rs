//! Cookie parsing and `Set-Cookie` construction for session credentials.

use std::convert::Infallible;

use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponseParts, ResponseParts};

/// Cookie name for the access token (short-lived).
pub const ACCESS_COOKIE_NAME: &str = "access_token";

/// Cookie name for the refresh token (long-lived).
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Cookie name for the signed last-activity marker.
pub const ACTIVITY_COOKIE_NAME: &str = "last_activity";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Attributes shared by every session cookie.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CookiePolicy {
    /// Set the Secure flag (should be true whenever served over HTTPS)
    pub secure: bool,
}

impl CookiePolicy {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    /// Build a `Set-Cookie` value for an httpOnly session cookie.
    pub fn set(&self, name: &str, value: &str, max_age_secs: u64) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
            name,
            value,
            max_age_secs,
            self.secure_suffix()
        )
    }

    /// Build a `Set-Cookie` value that removes the named cookie.
    pub fn clear(&self, name: &str) -> String {
        format!(
            "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0{}",
            name,
            self.secure_suffix()
        )
    }

    fn secure_suffix(&self) -> &'static str {
        if self.secure { "; Secure" } else { "" }
    }
}

/// Ordered set of `Set-Cookie` values to attach to one response.
/// A later write for the same cookie name replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies(Vec<String>);

impl SessionCookies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cookie: String) {
        let name = cookie_name(&cookie).to_string();
        self.0.retain(|existing| cookie_name(existing) != name);
        self.0.push(cookie);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Append every cookie as its own `Set-Cookie` header.
    pub fn append_to(&self, headers: &mut HeaderMap) {
        for cookie in &self.0 {
            match HeaderValue::from_str(cookie) {
                Ok(value) => {
                    headers.append(header::SET_COOKIE, value);
                }
                Err(e) => tracing::error!(error = %e, "Dropping unencodable cookie"),
            }
        }
    }

    /// Append only the cookies the headers do not already set.
    /// Cookies written explicitly by a handler take precedence.
    pub fn append_missing_to(&self, headers: &mut HeaderMap) {
        let already_set: Vec<String> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|c| cookie_name(c).to_string())
            .collect();

        let mut missing = SessionCookies::new();
        for cookie in &self.0 {
            if !already_set.iter().any(|name| name == cookie_name(cookie)) {
                missing.push(cookie.clone());
            }
        }
        missing.append_to(headers);
    }
}

impl IntoResponseParts for SessionCookies {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        self.append_to(res.headers_mut());
        Ok(res)
    }
}

fn cookie_name(cookie: &str) -> &str {
    cookie.split_once('=').map(|(name, _)| name).unwrap_or(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_cookie_simple() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("access_token=abc123"),
        );

        assert_eq!(get_cookie(&headers, "access_token"), Some("abc123"));
    }

    #[test]
    fn test_get_cookie_multiple() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("foo=bar; access_token=abc123; refresh_token=xyz789"),
        );

        assert_eq!(get_cookie(&headers, "access_token"), Some("abc123"));
        assert_eq!(get_cookie(&headers, "refresh_token"), Some("xyz789"));
        assert_eq!(get_cookie(&headers, "foo"), Some("bar"));
    }

    #[test]
    fn test_get_cookie_not_found() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("foo=bar"));

        assert_eq!(get_cookie(&headers, "access_token"), None);
    }

    #[test]
    fn test_get_cookie_no_header() {
        let headers = HeaderMap::new();
        assert_eq!(get_cookie(&headers, "access_token"), None);
    }

    #[test]
    fn test_secure_flag_follows_policy() {
        let plain = CookiePolicy::new(false).set("access_token", "abc", 60);
        let secure = CookiePolicy::new(true).set("access_token", "abc", 60);

        assert_eq!(
            plain,
            "access_token=abc; HttpOnly; SameSite=Lax; Path=/; Max-Age=60"
        );
        assert!(secure.ends_with("; Secure"));
        assert!(CookiePolicy::new(false).clear("access_token").contains("Max-Age=0"));
    }

    #[test]
    fn test_later_write_replaces_same_cookie() {
        let policy = CookiePolicy::default();
        let mut cookies = SessionCookies::new();

        cookies.push(policy.set(ACTIVITY_COOKIE_NAME, "fresh", 1800));
        cookies.push(policy.set(ACCESS_COOKIE_NAME, "token", 900));
        cookies.push(policy.clear(ACTIVITY_COOKIE_NAME));

        let all: Vec<&str> = cookies.iter().collect();
        assert_eq!(all.len(), 2);
        assert!(all[0].starts_with("access_token=token"));
        assert!(all[1].starts_with("last_activity=;"));
    }

    #[test]
    fn test_append_emits_one_header_per_cookie() {
        let policy = CookiePolicy::default();
        let mut cookies = SessionCookies::new();
        cookies.push(policy.clear(ACCESS_COOKIE_NAME));
        cookies.push(policy.clear(REFRESH_COOKIE_NAME));

        let mut headers = HeaderMap::new();
        cookies.append_to(&mut headers);

        assert_eq!(headers.get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn test_append_missing_keeps_handler_cookies() {
        let policy = CookiePolicy::default();
        let mut headers = HeaderMap::new();
        headers.append(
            header::SET_COOKIE,
            HeaderValue::from_str(&policy.clear(ACTIVITY_COOKIE_NAME)).unwrap(),
        );

        let mut pending = SessionCookies::new();
        pending.push(policy.set(ACTIVITY_COOKIE_NAME, "fresh", 1800));
        pending.push(policy.set(ACCESS_COOKIE_NAME, "token", 900));
        pending.append_missing_to(&mut headers);

        let all: Vec<&str> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(all.len(), 2);
        assert!(all[0].starts_with("last_activity=;"));
        assert!(all[1].starts_with("access_token=token"));
    }
}
