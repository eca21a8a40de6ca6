use http::StatusCode;
use spin_sdk::http::Response;
use std::fmt;
use thiserror::Error;

/// Failures of the social graph and feed operations.
#[derive(Debug, Error)]
pub enum SocialError {
    /// Malformed input, rejected before touching the store.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation's precondition did not hold when it ran. Callers treat this as a
    /// no-op outcome and refresh their view.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The first half of a paired write landed and the second did not. Re-running the
    /// same operation converges.
    #[error("{op}: wrote {applied} but not {pending}: {source}")]
    PartialWrite {
        op: &'static str,
        applied: String,
        pending: String,
        #[source]
        source: Box<SocialError>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    /// The viewer can see the target but is not allowed to change it.
    #[error("permission denied")]
    PermissionDenied,

    #[error("conflict: {0}")]
    Conflict(String),

    /// Store or auth collaborator unreachable; safe to retry.
    #[error("store unavailable: {0}")]
    Transient(#[from] anyhow::Error),

    #[error("malformed document: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type SocialResult<T> = Result<T, SocialError>;

impl SocialError {
    pub fn not_found(what: impl fmt::Display) -> Self {
        SocialError::NotFound(what.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        SocialError::Validation(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        SocialError::PreconditionFailed(msg.into())
    }

    /// Whether re-invoking the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SocialError::PartialWrite { .. } | SocialError::Transient(_))
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::Unauthorized => write!(f, "Unauthorized"),
            ApiError::Forbidden => write!(f, "Forbidden"),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Unavailable(msg)
            | ApiError::InternalError(msg) => msg.clone(),
            ApiError::Unauthorized => "Unauthorized".to_string(),
            ApiError::Forbidden => "Forbidden".to_string(),
        }
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        let body = serde_json::to_vec(&serde_json::json!({"error": err.message()}))
            .unwrap_or_default();
        Response::builder()
            .status(err.status().as_u16())
            .header("Content-Type", "application/json")
            .body(body)
            .build()
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<SocialError> for ApiError {
    fn from(err: SocialError) -> Self {
        match err {
            SocialError::Validation(msg) => ApiError::BadRequest(msg),
            SocialError::PreconditionFailed(msg) | SocialError::Conflict(msg) => {
                ApiError::Conflict(msg)
            }
            // Invisible and missing look the same from the outside.
            SocialError::NotFound(msg) => ApiError::NotFound(msg),
            SocialError::Unauthorized => ApiError::Unauthorized,
            SocialError::PermissionDenied => ApiError::Forbidden,
            err @ SocialError::PartialWrite { .. } => ApiError::Unavailable(err.to_string()),
            SocialError::Transient(e) => ApiError::Unavailable(e.to_string()),
            SocialError::Decode(e) => ApiError::InternalError(e.to_string()),
        }
    }
}
