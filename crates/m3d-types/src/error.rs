//! Core error types for the mesh pipeline kernel.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised by the credit ledger (C1).
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("user {0} not found")]
    NotFound(String),
    #[error("user {user} has {balance} credits, needs {needed}")]
    InsufficientCredits {
        user: String,
        balance: i64,
        needed: i64,
    },
    #[error("ledger backend error: {0}")]
    Backend(String),
}

impl ErrorCode for LedgerError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "LEDGER_USER_NOT_FOUND",
            Self::InsufficientCredits { .. } => "LEDGER_INSUFFICIENT_CREDITS",
            Self::Backend(_) => "LEDGER_BACKEND_ERROR",
        }
    }
}

/// Errors raised by the `DocStore`/`BlobStore` adapters (C2 and persistence).
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("optimistic concurrency conflict on {0}")]
    Conflict(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "STORE_NOT_FOUND",
            Self::Conflict(_) => "STORE_CONFLICT",
            Self::Backend(_) => "STORE_BACKEND_ERROR",
        }
    }
}

/// Errors raised by the vision/view generator (C4).
#[derive(Error, Debug, Clone)]
pub enum VisionError {
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("content blocked: {0}")]
    ContentBlocked(String),
    #[error("no image returned: {diagnostic}")]
    NoImageReturned { diagnostic: String },
    #[error("safety blocked: {0}")]
    SafetyBlocked(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl ErrorCode for VisionError {
    fn code(&self) -> &'static str {
        match self {
            Self::ProviderError(_) => "VISION_PROVIDER_ERROR",
            Self::ContentBlocked(_) => "VISION_CONTENT_BLOCKED",
            Self::NoImageReturned { .. } => "VISION_NO_IMAGE_RETURNED",
            Self::SafetyBlocked(_) => "VISION_SAFETY_BLOCKED",
            Self::Timeout(_) => "VISION_TIMEOUT",
        }
    }
}

/// Errors raised by mesh/retexture provider drivers (C3).
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("provider rejected submission: {0}")]
    SubmissionRejected(String),
    #[error("provider reported failure: {0}")]
    TaskFailed(String),
    #[error("provider request timed out")]
    Timeout,
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("no downloadable files matched the requested format")]
    NoMatchingFormat,
}

impl ErrorCode for ProviderError {
    fn code(&self) -> &'static str {
        match self {
            Self::SubmissionRejected(_) => "PROVIDER_SUBMISSION_REJECTED",
            Self::TaskFailed(_) => "PROVIDER_TASK_FAILED",
            Self::Timeout => "PROVIDER_TIMEOUT",
            Self::Transport(_) => "PROVIDER_TRANSPORT_ERROR",
            Self::NoMatchingFormat => "PROVIDER_NO_MATCHING_FORMAT",
        }
    }
}

/// Errors raised directly by the pipeline state machine (C5), prior to classification.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("precondition failed: {0}")]
    FailedPrecondition(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ErrorCode for PipelineError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "PIPELINE_INVALID_ARGUMENT",
            Self::FailedPrecondition(_) => "PIPELINE_FAILED_PRECONDITION",
            Self::PermissionDenied(_) => "PIPELINE_PERMISSION_DENIED",
            Self::ResourceExhausted(_) => "PIPELINE_RESOURCE_EXHAUSTED",
            Self::Ledger(e) => e.code(),
            Self::Store(e) => e.code(),
            Self::Vision(e) => e.code(),
            Self::Provider(e) => e.code(),
        }
    }
}

/// §6 command-API error envelope code. Every command handler maps its result
/// onto exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ApiErrorCode {
    Unauthenticated,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    FailedPrecondition,
    ResourceExhausted,
    Internal,
}

/// The JSON error envelope returned by the command API (§6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let code = match &err {
            PipelineError::InvalidArgument(_) => ApiErrorCode::InvalidArgument,
            PipelineError::FailedPrecondition(_) => ApiErrorCode::FailedPrecondition,
            PipelineError::PermissionDenied(_) => ApiErrorCode::PermissionDenied,
            PipelineError::ResourceExhausted(_) => ApiErrorCode::ResourceExhausted,
            PipelineError::Ledger(LedgerError::InsufficientCredits { .. }) => {
                ApiErrorCode::ResourceExhausted
            }
            PipelineError::Ledger(LedgerError::NotFound(_)) => ApiErrorCode::NotFound,
            PipelineError::Store(StoreError::NotFound(_)) => ApiErrorCode::NotFound,
            _ => ApiErrorCode::Internal,
        };
        ApiError::new(code, err.to_string())
    }
}
