use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// The main error type for tidepool
#[derive(Debug, thiserror::Error)]
pub enum TidepoolError {
    /// The session endpoint answered 401: there is no valid session.
    ///
    /// Never retried automatically; the store clears local state and
    /// hands off to the redirect guard.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// The fetch failed in transit or the endpoint answered an unexpected
    /// status. Recovered via the retry controller.
    #[error("Network error: {0}")]
    Network(String),

    /// The automatic retry budget is spent; only a manual refresh can
    /// recover.
    #[error("Retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// Rejected locally by the submission guard before any request was sent.
    #[error("Duplicate submission: {0}")]
    DuplicateSubmission(String),

    /// CSRF token missing, malformed, or mismatched.
    #[error("Invalid CSRF token")]
    InvalidCsrf,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl TidepoolError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn duplicate_submission(key: impl Into<String>) -> Self {
        Self::DuplicateSubmission(key.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the retry controller may recover from this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::Network(_) => ErrorCode::Network,
            Self::RetryExhausted { .. } => ErrorCode::RetryExhausted,
            Self::DuplicateSubmission(_) => ErrorCode::DuplicateSubmission,
            Self::InvalidCsrf => ErrorCode::InvalidCsrf,
            Self::Config(_) => ErrorCode::Config,
            Self::Anyhow(_) => ErrorCode::Internal,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InvalidCsrf => StatusCode::FORBIDDEN,
            Self::DuplicateSubmission(_) => StatusCode::CONFLICT,
            Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::RetryExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error payload returned by handlers and middleware.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: ErrorCode,
    error: String,
}

impl IntoResponse for TidepoolError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            error: self.to_string(),
        };

        tracing::error!(
            status = status.as_u16(),
            code = ?body.code,
            error = %self,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Machine-readable error code, used in serialized error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthenticated,
    Network,
    RetryExhausted,
    DuplicateSubmission,
    InvalidCsrf,
    Config,
    Internal,
}

/// Convenience Result type using TidepoolError
pub type Result<T> = std::result::Result<T, TidepoolError>;
