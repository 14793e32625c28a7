use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used to pick user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before any network call.
    Validation,
    /// Missing or expired credentials.
    Auth,
    /// Duplicate or gone resources, access denied.
    Conflict,
    /// Transport failure or malformed response.
    Network,
    /// The server failed (5xx).
    Server,
}

/// Errors returned by the marketplace API client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("not logged in")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Duplicate bid, deleted project and similar state conflicts (409/410).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Any other 4xx.
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Build the error for a non-success HTTP status and the server's `error` text.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            409 | 410 => Self::Conflict(message),
            400..=499 => Self::Rejected { status, message },
            _ => Self::Server { status, message },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::Rejected { .. } => ErrorCategory::Validation,
            Self::Unauthorized => ErrorCategory::Auth,
            Self::Forbidden(_) | Self::NotFound(_) | Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Transport(_) | Self::Decode(_) => ErrorCategory::Network,
            Self::Server { .. } => ErrorCategory::Server,
        }
    }

    /// Text shown to the user in a notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Unauthorized => "Please log in to continue.".to_owned(),
            Self::Forbidden(message)
            | Self::NotFound(message)
            | Self::Conflict(message)
            | Self::Rejected { message, .. } => message.clone(),
            Self::Server { .. } => "Something went wrong on the server, please try again later.".to_owned(),
            Self::Transport(_) | Self::Decode(_) => {
                "Could not reach the server, please try again.".to_owned()
            }
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    ApiError::from_status(status, String::new()).category()
}
