//! Authentication state traits and macro.

use std::sync::Arc;

use super::activity::ActivityTracker;
use super::cookie::CookiePolicy;
use crate::jwt::JwtConfig;

/// Everything the session guards need: the signer and the activity tracker.
#[derive(Clone)]
pub struct SessionBackend {
    pub jwt: Arc<JwtConfig>,
    pub activity: Arc<ActivityTracker>,
}

impl SessionBackend {
    pub fn new(jwt: JwtConfig, activity: ActivityTracker) -> Self {
        Self {
            jwt: Arc::new(jwt),
            activity: Arc::new(activity),
        }
    }

    pub fn cookie_policy(&self) -> CookiePolicy {
        self.activity.policy()
    }
}

/// Trait for state types that provide the session backend for authentication.
pub trait HasSessionBackend {
    fn session(&self) -> &SessionBackend;
}

impl HasSessionBackend for SessionBackend {
    fn session(&self) -> &SessionBackend {
        self
    }
}

/// Macro to implement `HasSessionBackend` for state structs with a `session: SessionBackend` field.
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct MyState {
///     pub session: SessionBackend,
///     // ... other fields
/// }
///
/// impl_has_session_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_session_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasSessionBackend for $state_type {
            fn session(&self) -> &$crate::auth::SessionBackend {
                &self.session
            }
        }
    };
}
