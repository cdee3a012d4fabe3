use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Provider refused the credential: {0}")]
    AccessDenied(String),

    #[error("Provider rejected the access token")]
    Unauthorized,

    #[error("No such device or property: {0}")]
    NotFound(String),

    #[error("Provider is throttling requests")]
    RateLimited,

    #[error("Provider service failure: {0}")]
    ServerError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Could not reach provider: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),
}

/// Coarse classification used by the session and cache layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Transport,
    Protocol,
}

/// Response bodies are cut to this many bytes before they reach an error.
const MAX_BODY_IN_ERROR: usize = 500;

impl ApiError {
    fn clip_body(body: &str) -> String {
        if body.len() <= MAX_BODY_IN_ERROR {
            body.to_string()
        } else {
            let mut end = MAX_BODY_IN_ERROR;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... ({} bytes)", &body[..end], body.len())
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = Self::clip_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimited,
            code @ 500..=599 => ApiError::ServerError(format!("HTTP {}: {}", code, body)),
            _ => ApiError::InvalidResponse(format!("HTTP {}: {}", status, body)),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err)
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiError::Unauthorized | ApiError::AccessDenied(_) => ErrorCategory::Authentication,
            ApiError::RateLimited
            | ApiError::ServerError(_)
            | ApiError::Timeout
            | ApiError::Network(_) => ErrorCategory::Transport,
            ApiError::NotFound(_) | ApiError::InvalidResponse(_) => ErrorCategory::Protocol,
        }
    }
}
