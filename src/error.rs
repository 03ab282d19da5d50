//! Error types for the Hemmer provider waiter.
//!
//! [`ProviderError`] is what CRUD handlers hand back to the provider protocol.
//! [`NotFoundError`] is the typed "the addressed object does not exist" signal
//! produced by the classifier and consumed by read handlers and waiters.
//! [`ApiError`] is a plain remote error shape for clients that do not bring
//! their own.

use std::fmt;

use thiserror::Error;

use crate::classify::RemoteError;

/// Boxed error used as the cause of a [`NotFoundError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by provider CRUD handlers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote API returned an error that has no more specific mapping.
    #[error("SDK error: {0}")]
    Sdk(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Waiting for a resource exceeded its timeout.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The resource reached a state the operation did not expect.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// The operation was cancelled before it finished.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Sdk(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::PermissionDenied(msg) => msg,
            Self::ResourceExhausted(msg) => msg,
            Self::DeadlineExceeded(msg) => msg,
            Self::FailedPrecondition(msg) => msg,
            Self::Cancelled(msg) => msg,
        }
    }

    /// Map a remote API error onto the closest provider error kind.
    ///
    /// Access-denied and throttling codes keep their meaning; everything else
    /// is reported as an SDK error with the remote code in the message.
    pub fn from_remote<E: RemoteError + ?Sized>(err: &E) -> Self {
        let msg = err.to_string();
        match err.code() {
            Some(code) if is_access_denied_code(code) => Self::PermissionDenied(msg),
            Some(code) if is_throttling_code(code) => Self::ResourceExhausted(msg),
            _ => Self::Sdk(msg),
        }
    }

    /// Prefix the message with operation context, keeping the error kind.
    pub fn with_context(self, context: impl fmt::Display) -> Self {
        let wrap = |msg: String| format!("{}: {}", context, msg);
        match self {
            Self::NotFound(msg) => Self::NotFound(wrap(msg)),
            Self::Validation(msg) => Self::Validation(wrap(msg)),
            Self::Sdk(msg) => Self::Sdk(wrap(msg)),
            Self::Configuration(msg) => Self::Configuration(wrap(msg)),
            Self::Serialization(err) => Self::Validation(wrap(err.to_string())),
            Self::PermissionDenied(msg) => Self::PermissionDenied(wrap(msg)),
            Self::ResourceExhausted(msg) => Self::ResourceExhausted(wrap(msg)),
            Self::DeadlineExceeded(msg) => Self::DeadlineExceeded(wrap(msg)),
            Self::FailedPrecondition(msg) => Self::FailedPrecondition(wrap(msg)),
            Self::Cancelled(msg) => Self::Cancelled(wrap(msg)),
        }
    }
}

fn is_access_denied_code(code: &str) -> bool {
    matches!(
        code,
        "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation"
    )
}

fn is_throttling_code(code: &str) -> bool {
    matches!(
        code,
        "Throttling" | "ThrottlingException" | "TooManyRequestsException" | "RequestLimitExceeded"
    )
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::Sdk(msg) => tonic::Status::internal(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            }
            ProviderError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ProviderError::ResourceExhausted(msg) => tonic::Status::resource_exhausted(msg),
            ProviderError::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            ProviderError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::Cancelled(msg) => tonic::Status::cancelled(msg),
        }
    }
}

/// Why a lookup concluded that the addressed object is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// The remote API said so, or the object is in a state equivalent to gone.
    Absent,
    /// The remote call succeeded but returned no payload.
    EmptyResult,
    /// A lookup meant to address one object matched several.
    TooManyResults(usize),
}

/// The addressed remote object does not exist.
///
/// Carries the remote error that revealed the absence (if any) and a rendering
/// of the request that produced it, for diagnostics.
#[derive(Debug)]
pub struct NotFoundError {
    kind: NotFoundKind,
    message: Option<String>,
    last_request: Option<String>,
    cause: Option<BoxError>,
}

impl NotFoundError {
    /// An absence with no further detail.
    pub fn new() -> Self {
        Self {
            kind: NotFoundKind::Absent,
            message: None,
            last_request: None,
            cause: None,
        }
    }

    /// An absence revealed by a remote error.
    pub fn from_cause<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            cause: Some(Box::new(cause)),
            ..Self::new()
        }
    }

    /// A successful response that carried nothing.
    pub fn empty_result() -> Self {
        Self {
            kind: NotFoundKind::EmptyResult,
            ..Self::new()
        }
    }

    /// A lookup that matched `count` objects instead of one.
    pub fn too_many_results(count: usize) -> Self {
        Self {
            kind: NotFoundKind::TooManyResults(count),
            ..Self::new()
        }
    }

    /// Set an explicit message, e.g. the terminal state that makes an object count as gone.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Record the request that produced this result.
    pub fn with_request<R: fmt::Debug + ?Sized>(mut self, request: &R) -> Self {
        self.last_request = Some(format!("{:?}", request));
        self
    }

    /// Why the object counts as absent.
    pub fn kind(&self) -> NotFoundKind {
        self.kind
    }

    /// The request that produced this result, if recorded.
    pub fn last_request(&self) -> Option<&str> {
        self.last_request.as_deref()
    }

    /// The remote error that revealed the absence, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl Default for NotFoundError {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            return f.write_str(message);
        }
        match (self.kind, &self.cause) {
            (NotFoundKind::EmptyResult, _) => f.write_str("empty result"),
            (NotFoundKind::TooManyResults(count), _) => {
                write!(f, "too many results: wanted 1, got {}", count)
            }
            (NotFoundKind::Absent, Some(cause)) => write!(f, "{}", cause),
            (NotFoundKind::Absent, None) => f.write_str("couldn't find resource"),
        }
    }
}

impl std::error::Error for NotFoundError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<NotFoundError> for ProviderError {
    fn from(err: NotFoundError) -> Self {
        ProviderError::NotFound(err.to_string())
    }
}

/// A remote API error: a service error code plus a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// Service error code, e.g. `ResourceNotFoundException`.
    pub code: String,
    /// Human-readable message from the service.
    pub message: String,
}

impl ApiError {
    /// Create a new remote error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        ProviderError::from_remote(&err)
    }
}

impl RemoteError for ApiError {
    fn code(&self) -> Option<&str> {
        Some(&self.code)
    }

    fn message(&self) -> Option<&str> {
        Some(&self.message)
    }
}
