use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Platform;

/// Why no usable record could be produced for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Resource confirmed absent or deleted.
    NotFound,
    /// Private or restricted.
    AccessDenied,
    /// Transient; the caller may retry later.
    RateLimited,
    /// Automation detected or denied.
    Blocked,
    Timeout,
    /// Structurally unexpected payload.
    MalformedResponse,
    /// The batch was aborted before this target finished.
    Cancelled,
}

impl FailureReason {
    /// How specific a reason is when several tiers failed differently.
    /// The most specific recorded reason is reported.
    pub fn specificity(&self) -> u8 {
        match self {
            FailureReason::Cancelled => 7,
            FailureReason::NotFound => 6,
            FailureReason::AccessDenied => 5,
            FailureReason::Blocked => 4,
            FailureReason::RateLimited => 3,
            FailureReason::Timeout => 2,
            FailureReason::MalformedResponse => 1,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::NotFound => "not found",
            FailureReason::AccessDenied => "access denied",
            FailureReason::RateLimited => "rate limited",
            FailureReason::Blocked => "blocked",
            FailureReason::Timeout => "timed out",
            FailureReason::MalformedResponse => "malformed response",
            FailureReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal outcome for one target. Never aborts the rest of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{platform} extraction {reason} for {url}: {message}")]
pub struct ExtractionFailure {
    pub url: String,
    pub platform: Platform,
    pub reason: FailureReason,
    pub message: String,
}

impl ExtractionFailure {
    pub fn new(
        platform: Platform,
        url: impl Into<String>,
        reason: FailureReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            platform,
            reason,
            message: message.into(),
        }
    }
}

/// Caller-side target validation. Raised before extraction starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported platform for URL: {0}")]
    UnsupportedPlatform(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}
