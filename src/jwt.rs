//! Credential signing and verification.
//!
//! Two token kinds with independent secrets and lifetimes:
//! - Access tokens: short-lived, carry roles and permissions, never stored server-side
//! - Refresh tokens: long-lived, carry roles only, only ever sent as an httpOnly cookie
//!
//! Verification is purely cryptographic plus an expiry check. No store is consulted.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Who a credential speaks for. Input to issuance, recoverable from access claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject (username)
    pub subject: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// JWT claims for access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (username)
    pub sub: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

impl AccessClaims {
    pub fn identity(&self) -> Identity {
        Identity {
            subject: self.sub.clone(),
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// JWT claims for refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (username)
    pub sub: String,
    pub roles: Vec<String>,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Default access token lifetime: 15 minutes
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;

/// Default refresh token lifetime: 2 weeks
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 14 * 24 * 60 * 60;

/// Lifetimes for both token kinds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    pub access_secs: u64,
    pub refresh_secs: u64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_secs: DEFAULT_REFRESH_TTL_SECS,
        }
    }
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    lifetimes: TokenLifetimes,
}

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

impl JwtConfig {
    /// Create a new JWT configuration.
    /// The access and refresh secrets must differ so one kind can never be minted with the other's key.
    pub fn new(
        access_secret: &[u8],
        refresh_secret: &[u8],
        lifetimes: TokenLifetimes,
    ) -> Result<Self, JwtError> {
        if access_secret == refresh_secret {
            return Err(JwtError::SharedSecret);
        }

        Ok(Self {
            access_encoding: EncodingKey::from_secret(access_secret),
            access_decoding: DecodingKey::from_secret(access_secret),
            refresh_encoding: EncodingKey::from_secret(refresh_secret),
            refresh_decoding: DecodingKey::from_secret(refresh_secret),
            lifetimes,
        })
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Issue an access token for the given identity.
    pub fn issue_access(&self, identity: &Identity) -> Result<IssuedToken, JwtError> {
        self.issue_access_at(identity, unix_now()?)
    }

    /// Issue an access token as if the current time were `now`.
    pub fn issue_access_at(&self, identity: &Identity, now: u64) -> Result<IssuedToken, JwtError> {
        let exp = now.saturating_add(self.lifetimes.access_secs);

        let claims = AccessClaims {
            sub: identity.subject.clone(),
            roles: identity.roles.clone(),
            permissions: identity.permissions.clone(),
            token_type: TokenType::Access,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.access_encoding)
            .map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            issued_at: now,
            expires_at: exp,
            duration: self.lifetimes.access_secs,
        })
    }

    /// Issue a refresh token. Permissions are not embedded; they are re-read on refresh.
    pub fn issue_refresh(&self, identity: &Identity) -> Result<IssuedToken, JwtError> {
        self.issue_refresh_at(identity, unix_now()?)
    }

    /// Issue a refresh token as if the current time were `now`.
    pub fn issue_refresh_at(&self, identity: &Identity, now: u64) -> Result<IssuedToken, JwtError> {
        let exp = now.saturating_add(self.lifetimes.refresh_secs);

        let claims = RefreshClaims {
            sub: identity.subject.clone(),
            roles: identity.roles.clone(),
            token_type: TokenType::Refresh,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.refresh_encoding)
            .map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            issued_at: now,
            expires_at: exp,
            duration: self.lifetimes.refresh_secs,
        })
    }

    /// Validate and decode an access token.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, VerifyError> {
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.access_decoding, &validation())
            .map_err(VerifyError::from)?;

        if data.claims.token_type != TokenType::Access {
            return Err(VerifyError::Invalid);
        }

        Ok(data.claims)
    }

    /// Validate and decode a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, VerifyError> {
        let data =
            jsonwebtoken::decode::<RefreshClaims>(token, &self.refresh_decoding, &validation())
                .map_err(VerifyError::from)?;

        if data.claims.token_type != TokenType::Refresh {
            return Err(VerifyError::Invalid);
        }

        Ok(data.claims)
    }
}

/// Why a presented token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// Signature valid but past `exp`
    Expired,
    /// Malformed, tampered, wrong secret, or wrong token type
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            _ => VerifyError::Invalid,
        }
    }
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::Expired => write!(f, "Token expired"),
            VerifyError::Invalid => write!(f, "Invalid token"),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Errors that can occur while configuring or issuing tokens.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
    /// Access and refresh secrets are identical
    SharedSecret,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::TimeError => write!(f, "System time error"),
            JwtError::SharedSecret => write!(f, "Access and refresh secrets must differ"),
        }
    }
}

impl std::error::Error for JwtError {}
