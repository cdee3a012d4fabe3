//! Error taxonomy shared by every layer of the core.
//!
//! Callers branch on the category, not on the HTTP detail:
//!
//! - `Configuration`: bad or missing credentials/settings. Fatal, never retried.
//! - `Authentication`: credential rejected or expired. One renewal attempt is
//!   made by the session layer before this reaches a caller.
//! - `Transport`: network failure or timeout. Retried on the next poll cycle.
//! - `Protocol`: the provider answered with something we could not understand.
//! - `Io`: token storage unreadable or unwritable.
//!
//! The enum is `Clone` because one renewal outcome is handed to every caller
//! that was waiting on it.

use thiserror::Error;

use crate::api::ApiError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Whether the caller may try again later with the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        use crate::api::ErrorCategory;

        let message = err.to_string();
        match err.category() {
            ErrorCategory::Authentication => Error::Authentication(message),
            ErrorCategory::Transport => Error::Transport(message),
            ErrorCategory::Protocol => Error::Protocol(message),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
