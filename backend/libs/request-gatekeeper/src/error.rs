//! Error types for the request pipeline
//!
//! Every terminal failure surfaces either as a forced logout carrying a login
//! redirect, or as a typed error the calling screen can display.

use reqwest::StatusCode;
use thiserror::Error;

use crate::failure::LoginRedirect;

pub type Result<T> = std::result::Result<T, GatekeeperError>;

/// Why a session was force-terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Protected call attempted with no stored credential
    NoCredential,
    /// The refresh call failed or returned no new credential
    RefreshFailed,
    /// 401 persisted after the single refresh-and-resend cycle
    SessionInvalid,
    /// 403 outside the show-mutation endpoints
    Forbidden,
}

impl AuthFailure {
    /// Human-readable reason shown on the login screen
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::NoCredential => "Please log in to continue.",
            AuthFailure::RefreshFailed | AuthFailure::SessionInvalid => {
                "Your session has expired. Please log in again."
            }
            AuthFailure::Forbidden => {
                "You are not authorized to access this resource. Please log in again."
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GatekeeperError {
    /// The session was cleared; the caller should navigate to `redirect`
    #[error("Forced logout ({cause:?}): {}", .redirect.reason)]
    ForcedLogout {
        cause: AuthFailure,
        redirect: LoginRedirect,
    },

    /// 401 on a route that degrades gracefully instead of logging out
    #[error("Authentication required")]
    Unauthorized,

    /// Valid session, disallowed action
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Response to a request issued under a session that has since ended
    #[error("Session ended while the request was in flight")]
    SessionEnded,

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),
}

impl GatekeeperError {
    /// HTTP status equivalent, for screens that branch on status codes
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ForcedLogout { .. } | Self::Unauthorized | Self::SessionEnded => 401,
            Self::PermissionDenied { .. } => 403,
            Self::Transport(e) => e.status().map(|s| s.as_u16()).unwrap_or(502),
            Self::InvalidRequest(_) => 400,
            Self::Storage(_) => 500,
        }
    }

    pub fn is_forced_logout(&self) -> bool {
        matches!(self, Self::ForcedLogout { .. })
    }

    pub fn login_redirect(&self) -> Option<&LoginRedirect> {
        match self {
            Self::ForcedLogout { redirect, .. } => Some(redirect),
            _ => None,
        }
    }
}

/// Refresh failures are shared between every waiter of one refresh flight,
/// hence `Clone` and string payloads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No session to refresh")]
    NoSession,

    #[error("Refresh rejected with status {status}")]
    Rejected { status: StatusCode },

    #[error("Refresh response carried no token")]
    MissingToken,

    #[error("Refresh transport error: {0}")]
    Transport(String),

    #[error("Refresh timed out")]
    TimedOut,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored value could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),
}
