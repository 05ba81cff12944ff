//! Session guards built on short-lived access tokens, long-lived refresh
//! tokens, and a signed sliding inactivity marker.
//!
//! Every successful guard slides the marker forward; any terminal failure
//! clears all three session cookies in the same response.

mod activity;
mod cookie;
mod errors;
mod extractors;
mod ip;
mod permissions;
mod state;
mod types;

pub use activity::{ActivityTracker, DEFAULT_INACTIVITY_SECS};
pub use cookie::{
    ACCESS_COOKIE_NAME, ACTIVITY_COOKIE_NAME, CookiePolicy, REFRESH_COOKIE_NAME, SessionCookies,
    get_cookie,
};
pub use errors::{AuthErrorKind, FORBIDDEN, INACTIVITY_TIMEOUT, SessionRejection, TOKEN_EXPIRED};
pub use extractors::{
    OptionalAuth, PENDING_SESSION_COOKIES, RequireAuth, RequirePermission, RequireRefreshToken,
    access_token, apply_session_cookies, authorize_access, authorize_refresh, reject,
    verify_access, verify_refresh,
};
pub(crate) use extractors::touch_activity;
pub use ip::{HasHeadersAndExtensions, extract_client_ip};
pub use permissions::{ADMIN_ROLE, Permission, has_permission};
pub use state::{HasSessionBackend, SessionBackend};
pub use types::{AuthenticatedUser, RefreshSession, Verification};
