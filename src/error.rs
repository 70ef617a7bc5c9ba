//! Unified application error model.
//! One enum covers every failure the pipeline classifies: pre-check rejections
//! (CSRF, expired session), expected application errors raised by handlers,
//! and unexpected system errors. Helpers map each kind to an HTTP status.

use std::fmt::{Display, Formatter};

/// Coarse classification used by routing decisions and the no-rollback
/// allow-list. Derived from the concrete `AppError` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CsrfMismatch,
    SessionExpired,
    Application,
    System,
}

#[derive(Debug)]
pub enum AppError {
    /// POST token missing or not matching the session token.
    CsrfMismatch { message: String },
    /// Request arrived on a brand-new session for a non-root path.
    SessionExpired { message: String },
    /// Expected, user-correctable failure (input validation etc.).
    Application { message: String },
    /// Unexpected failure; `cause` keeps the full chain for server-side logs.
    System { message: String, cause: Option<String> },
}

impl AppError {
    pub fn csrf<S: Into<String>>(msg: S) -> Self {
        AppError::CsrfMismatch { message: msg.into() }
    }

    pub fn expired<S: Into<String>>(msg: S) -> Self {
        AppError::SessionExpired { message: msg.into() }
    }

    pub fn app<S: Into<String>>(msg: S) -> Self {
        AppError::Application { message: msg.into() }
    }

    pub fn system<S: Into<String>>(msg: S) -> Self {
        AppError::System { message: msg.into(), cause: None }
    }

    pub fn system_with_cause<S: Into<String>, C: Into<String>>(msg: S, cause: C) -> Self {
        AppError::System { message: msg.into(), cause: Some(cause.into()) }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::CsrfMismatch { message }
            | AppError::SessionExpired { message }
            | AppError::Application { message }
            | AppError::System { message, .. } => message.as_str(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::CsrfMismatch { .. } => ErrorKind::CsrfMismatch,
            AppError::SessionExpired { .. } => ErrorKind::SessionExpired,
            AppError::Application { .. } => ErrorKind::Application,
            AppError::System { .. } => ErrorKind::System,
        }
    }

    /// Full diagnostic text for server-side logs. Never sent to a client.
    pub fn detail(&self) -> String {
        match self {
            AppError::System { message, cause: Some(cause) } => {
                format!("{}: {}", message, cause)
            }
            other => other.message().to_string(),
        }
    }

    /// Map to HTTP status code for direct (non-routed) rejections.
    pub fn http_status(&self) -> u16 {
        match self {
            // Both pre-check rejections read as "forbidden" to script callers.
            AppError::CsrfMismatch { .. } | AppError::SessionExpired { .. } => 403,
            AppError::Application { .. } => 422,
            AppError::System { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: anything untyped is a system error; keep the chain.
        AppError::System { message: err.to_string(), cause: Some(format!("{:#}", err)) }
    }
}

/// Input-check shortcut: raises an application error with the given message
/// when the condition does not hold.
pub fn require(condition: bool, message: impl Into<String>) -> AppResult<()> {
    if condition { Ok(()) } else { Err(AppError::app(message)) }
}
