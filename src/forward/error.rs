//! Forward module error types
//!
//! Defines all error types used in the forward module for request handling.
//! These are provider-driver-level errors; the pipeline converts them into
//! the top-level `crate::error::AppError` taxonomy at its boundary.

#[derive(Debug)]
pub enum ForwardError {
    Unauthorized(String),
    #[allow(dead_code)]
    Forbidden(String),
    ModelNotFound(String),
    UpstreamNotFound(String),
    RequestFailed(String),
    InvalidRequest(String),
    RateLimited(String),
    /// A non-2xx upstream status that doesn't map to a more specific
    /// variant above, carrying the real status code so the retry policy
    /// can judge it without parsing text back out of a message string.
    UpstreamStatus(u16, String),
    Timeout(String),
    Internal(String),
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::Unauthorized(m) => write!(f, "Unauthorized: {}", m),
            ForwardError::Forbidden(m) => write!(f, "Forbidden: {}", m),
            ForwardError::ModelNotFound(m) => write!(f, "Model not found: {}", m),
            ForwardError::UpstreamNotFound(m) => write!(f, "Upstream not found: {}", m),
            ForwardError::RequestFailed(m) => write!(f, "Request failed: {}", m),
            ForwardError::InvalidRequest(m) => write!(f, "Invalid request: {}", m),
            ForwardError::RateLimited(m) => write!(f, "Rate limited: {}", m),
            ForwardError::UpstreamStatus(code, m) => write!(f, "Upstream status {}: {}", code, m),
            ForwardError::Timeout(m) => write!(f, "Timeout: {}", m),
            ForwardError::Internal(m) => write!(f, "Internal error: {}", m),
        }
    }
}

impl std::error::Error for ForwardError {}

pub type ForwardResult<T> = Result<T, ForwardError>;
