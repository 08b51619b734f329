#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]
#![forbid(unsafe_code)]

//! C8 error classifier (§4.8, §7): maps the raw `PipelineError` a stage
//! raised into a closed taxonomy, carrying enough detail for the persisted
//! `PipelineErrorRecord` and for an outer retry loop's advisory decision.
//! The classifier itself never retries anything; it only recommends.

use m3d_types::error::{LedgerError, PipelineError, ProviderError, StoreError, VisionError};
use m3d_types::pipeline::PipelineErrorRecord;

/// §4.8 closed error category taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    RateLimit,
    Safety,
    Validation,
    Resource,
    Service,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Safety => "safety",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Service => "service",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// §4.8 closed severity set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Warning => "warning",
            ErrorSeverity::Error => "error",
            ErrorSeverity::Critical => "critical",
        }
    }
}

/// A fully classified error, ready to be persisted as a `PipelineErrorRecord`
/// or consulted for an auto-retry decision.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub code: String,
    pub user_message: String,
    pub technical_message: String,
    pub retryable: bool,
    pub suggested_retry_delay_ms: Option<u64>,
}

impl ClassifiedError {
    pub fn to_record(&self) -> PipelineErrorRecord {
        PipelineErrorRecord {
            category: self.category.as_str().to_string(),
            severity: self.severity.as_str().to_string(),
            code: self.code.clone(),
            user_message: self.user_message.clone(),
            technical_message: self.technical_message.clone(),
            retryable: self.retryable,
            suggested_retry_delay_ms: self.suggested_retry_delay_ms,
        }
    }
}

const RATE_LIMIT_HINTS: [&str; 3] = ["rate limit", "429", "too many requests"];

fn looks_rate_limited(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Classifies a raw `PipelineError` per the category table in §7.
pub fn classify(err: &PipelineError) -> ClassifiedError {
    use m3d_types::error::ErrorCode;

    match err {
        PipelineError::InvalidArgument(msg) => ClassifiedError {
            category: ErrorCategory::Validation,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: msg.clone(),
            technical_message: msg.clone(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::FailedPrecondition(msg) => ClassifiedError {
            category: ErrorCategory::Validation,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: msg.clone(),
            technical_message: msg.clone(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::PermissionDenied(msg) => ClassifiedError {
            category: ErrorCategory::Validation,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: "You don't have access to this pipeline.".to_string(),
            technical_message: msg.clone(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::ResourceExhausted(msg) => ClassifiedError {
            category: ErrorCategory::Resource,
            severity: ErrorSeverity::Warning,
            code: err.code().to_string(),
            user_message: msg.clone(),
            technical_message: msg.clone(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::Ledger(LedgerError::InsufficientCredits { balance, needed, .. }) => {
            ClassifiedError {
                category: ErrorCategory::Resource,
                severity: ErrorSeverity::Error,
                code: err.code().to_string(),
                user_message: "You don't have enough credits for this step.".to_string(),
                technical_message: format!("balance={balance}, needed={needed}"),
                retryable: false,
                suggested_retry_delay_ms: None,
            }
        }
        PipelineError::Ledger(other) => ClassifiedError {
            category: ErrorCategory::Internal,
            severity: ErrorSeverity::Critical,
            code: err.code().to_string(),
            user_message: "Something went wrong updating your account.".to_string(),
            technical_message: other.to_string(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::Store(StoreError::Conflict(detail)) => ClassifiedError {
            category: ErrorCategory::Internal,
            severity: ErrorSeverity::Warning,
            code: err.code().to_string(),
            user_message: "Please try that again.".to_string(),
            technical_message: detail.clone(),
            retryable: true,
            suggested_retry_delay_ms: Some(200),
        },
        PipelineError::Store(other) => ClassifiedError {
            category: ErrorCategory::Internal,
            severity: ErrorSeverity::Critical,
            code: err.code().to_string(),
            user_message: "Something went wrong saving your pipeline.".to_string(),
            technical_message: other.to_string(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::Vision(VisionError::SafetyBlocked(reason))
        | PipelineError::Vision(VisionError::ContentBlocked(reason)) => ClassifiedError {
            category: ErrorCategory::Safety,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: reason.clone(),
            technical_message: reason.clone(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::Vision(VisionError::Timeout(duration)) => ClassifiedError {
            category: ErrorCategory::Network,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: "The image provider took too long to respond.".to_string(),
            technical_message: format!("timed out after {duration:?}"),
            retryable: true,
            suggested_retry_delay_ms: Some(2000),
        },
        PipelineError::Vision(VisionError::ProviderError(msg)) if looks_rate_limited(msg) => {
            ClassifiedError {
                category: ErrorCategory::RateLimit,
                severity: ErrorSeverity::Warning,
                code: err.code().to_string(),
                user_message: "The image provider is rate-limiting requests.".to_string(),
                technical_message: msg.clone(),
                retryable: true,
                suggested_retry_delay_ms: Some(5000),
            }
        }
        PipelineError::Vision(VisionError::ProviderError(msg)) => ClassifiedError {
            category: ErrorCategory::Network,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: "The image provider returned an error.".to_string(),
            technical_message: msg.clone(),
            retryable: true,
            suggested_retry_delay_ms: Some(2000),
        },
        PipelineError::Vision(VisionError::NoImageReturned { diagnostic }) => ClassifiedError {
            category: ErrorCategory::Service,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: "The image provider did not return a usable image.".to_string(),
            technical_message: diagnostic.clone(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::Provider(ProviderError::Timeout) => ClassifiedError {
            category: ErrorCategory::Network,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: "The mesh provider took too long to respond.".to_string(),
            technical_message: "provider poll/submit timed out".to_string(),
            retryable: true,
            suggested_retry_delay_ms: Some(3000),
        },
        PipelineError::Provider(ProviderError::Transport(msg)) if looks_rate_limited(msg) => {
            ClassifiedError {
                category: ErrorCategory::RateLimit,
                severity: ErrorSeverity::Warning,
                code: err.code().to_string(),
                user_message: "The mesh provider is rate-limiting requests.".to_string(),
                technical_message: msg.clone(),
                retryable: true,
                suggested_retry_delay_ms: Some(5000),
            }
        }
        PipelineError::Provider(ProviderError::Transport(msg)) => ClassifiedError {
            category: ErrorCategory::Network,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: "The mesh provider returned an error.".to_string(),
            technical_message: msg.clone(),
            retryable: true,
            suggested_retry_delay_ms: Some(3000),
        },
        PipelineError::Provider(ProviderError::SubmissionRejected(msg)) => ClassifiedError {
            category: ErrorCategory::Validation,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: msg.clone(),
            technical_message: msg.clone(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::Provider(ProviderError::TaskFailed(msg)) => ClassifiedError {
            category: ErrorCategory::Service,
            severity: ErrorSeverity::Error,
            code: err.code().to_string(),
            user_message: "The mesh provider reported a failure.".to_string(),
            technical_message: msg.clone(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
        PipelineError::Provider(ProviderError::NoMatchingFormat) => ClassifiedError {
            category: ErrorCategory::Internal,
            severity: ErrorSeverity::Critical,
            code: err.code().to_string(),
            user_message: "The generated mesh could not be retrieved in a usable format."
                .to_string(),
            technical_message: "no downloadable file matched any preferred format".to_string(),
            retryable: false,
            suggested_retry_delay_ms: None,
        },
    }
}

/// Advisory only (§4.8): the pipeline engine never auto-retries on its own;
/// callers (e.g. the poller) may consult this before looping.
pub fn should_auto_retry(classified: &ClassifiedError, attempts: u32, max: u32) -> bool {
    classified.retryable && attempts < max
}

pub const DEFAULT_MAX_AUTO_RETRIES: u32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_credits_classified_as_resource_not_retryable() {
        let err = PipelineError::Ledger(LedgerError::InsufficientCredits {
            user: "u1".to_string(),
            balance: 2,
            needed: 5,
        });
        let classified = classify(&err);
        assert_eq!(classified.category, ErrorCategory::Resource);
        assert!(!classified.retryable);
    }

    #[test]
    fn safety_blocked_never_auto_retries() {
        let err = PipelineError::Vision(VisionError::SafetyBlocked("nudity".to_string()));
        let classified = classify(&err);
        assert_eq!(classified.category, ErrorCategory::Safety);
        assert!(!should_auto_retry(&classified, 0, DEFAULT_MAX_AUTO_RETRIES));
    }

    #[test]
    fn rate_limit_hint_detected_in_provider_message() {
        let err = PipelineError::Provider(ProviderError::Transport(
            "429 Too Many Requests".to_string(),
        ));
        let classified = classify(&err);
        assert_eq!(classified.category, ErrorCategory::RateLimit);
        assert!(classified.suggested_retry_delay_ms.is_some());
    }

    #[test]
    fn network_error_retries_up_to_max_attempts() {
        let err = PipelineError::Vision(VisionError::Timeout(std::time::Duration::from_secs(60)));
        let classified = classify(&err);
        assert!(should_auto_retry(&classified, 2, DEFAULT_MAX_AUTO_RETRIES));
        assert!(!should_auto_retry(&classified, 3, DEFAULT_MAX_AUTO_RETRIES));
    }

    #[test]
    fn regeneration_cap_classified_as_resource_not_retryable() {
        let err = PipelineError::ResourceExhausted("regenerationsUsed at cap".to_string());
        let classified = classify(&err);
        assert_eq!(classified.category, ErrorCategory::Resource);
        assert!(!classified.retryable);
    }

    #[test]
    fn task_failed_is_not_retryable_service_error() {
        let err = PipelineError::Provider(ProviderError::TaskFailed("bad mesh".to_string()));
        let classified = classify(&err);
        assert_eq!(classified.category, ErrorCategory::Service);
        assert!(!classified.retryable);
    }
}
