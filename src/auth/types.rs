//! Authentication user types.

use crate::jwt::{AccessClaims, RefreshClaims};

/// Authenticated user information extracted from the access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// JWT claims from the access token
    pub claims: AccessClaims,
}

/// A verified refresh token whose session is still active.
#[derive(Debug, Clone)]
pub struct RefreshSession {
    /// JWT claims from the refresh token
    pub claims: RefreshClaims,
}

/// Outcome of looking for and verifying a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification<C> {
    Valid(C),
    Expired,
    Invalid,
    Missing,
}
