//! Client error types.

use serde::Deserialize;

use crate::auth::{INACTIVITY_TIMEOUT, TOKEN_EXPIRED};

/// Why a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The server saw no activity within the window
    InactivityTimeout,
    /// The refresh credential was rejected
    RefreshFailed,
    /// Any other terminal 401
    Unauthorized,
    /// `logout` was called
    UserRequested,
}

impl LogoutReason {
    /// Reason for a terminal 401 carrying `code`.
    pub fn from_code(code: Option<&str>) -> Self {
        match code {
            Some(INACTIVITY_TIMEOUT) => LogoutReason::InactivityTimeout,
            _ => LogoutReason::Unauthorized,
        }
    }
}

/// Error returned by client calls. `Clone` so one failed load can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Connection failure, reset, or other transport error
    Network(String),
    /// The attempt did not finish in time
    Timeout,
    /// Non-2xx response
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// A 2xx body that did not parse
    Decode(String),
    InvalidUrl(String),
    /// The call hit a terminal auth failure and the session was discarded
    SessionEnded(LogoutReason),
}

impl ClientError {
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Network(e.to_string())
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Status { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Worth another attempt: transport failures, timeouts, 408, 429, and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::Timeout => true,
            ClientError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// The one 401 a client may recover from by refreshing.
    pub fn is_token_expired(&self) -> bool {
        self.status() == Some(401) && self.code() == Some(TOKEN_EXPIRED)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Network(e) => write!(f, "network error: {}", e),
            ClientError::Timeout => write!(f, "request timed out"),
            ClientError::Status {
                status,
                code: Some(code),
                message,
            } => write!(f, "HTTP {} ({}): {}", status, code, message),
            ClientError::Status {
                status, message, ..
            } => write!(f, "HTTP {}: {}", status, message),
            ClientError::Decode(e) => write!(f, "invalid response body: {}", e),
            ClientError::InvalidUrl(e) => write!(f, "invalid URL: {}", e),
            ClientError::SessionEnded(reason) => write!(f, "session ended: {:?}", reason),
        }
    }
}

impl std::error::Error for ClientError {}

/// Error body shape shared by guard rejections and handler errors.
#[derive(Debug, Deserialize)]
pub(super) struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorBody {
    /// Build a status error from a non-2xx body, falling back to the reason phrase.
    pub(super) fn into_error(body: &[u8], status: reqwest::StatusCode) -> ClientError {
        let parsed: Option<ErrorBody> = serde_json::from_slice(body).ok();
        let (message, code) = match parsed {
            Some(body) => (body.error, body.code),
            None => (
                String::from_utf8_lossy(body).trim().to_string(),
                None,
            ),
        };
        let message = if message.is_empty() {
            status.canonical_reason().unwrap_or("Unknown status").to_string()
        } else {
            message
        };
        ClientError::Status {
            status: status.as_u16(),
            code,
            message,
        }
    }
}
