use std::time::Duration;

use engage_common::FailureReason;

/// Transport-level failures from the web client, browser sessions and external tools.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Redirect chain from {url} exceeded {hops} hops")]
    TooManyRedirects { url: String, hops: usize },

    #[error("Browser session error: {0}")]
    Browser(String),

    #[error("{tool} exited with {code:?}: {stderr}")]
    Tool {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Scraper error: {0}")]
    Scraper(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl FetchError {
    /// The failure this error implies on its own. `None` for errors that say
    /// nothing about the target (connection resets, unexpected tool output).
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            FetchError::Status { status, .. } => match status {
                404 | 410 => Some(FailureReason::NotFound),
                401 => Some(FailureReason::AccessDenied),
                403 => Some(FailureReason::Blocked),
                429 => Some(FailureReason::RateLimited),
                408 | 504 => Some(FailureReason::Timeout),
                _ => None,
            },
            FetchError::Timeout(_) => Some(FailureReason::Timeout),
            FetchError::TooManyRedirects { .. } => Some(FailureReason::Blocked),
            FetchError::Parse(_) => Some(FailureReason::MalformedResponse),
            FetchError::Network(_)
            | FetchError::Browser(_)
            | FetchError::Tool { .. }
            | FetchError::Scraper(_) => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout(Duration::ZERO);
        }
        match err.status() {
            Some(status) => FetchError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => FetchError::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

impl From<browserless_client::BrowserlessError> for FetchError {
    fn from(err: browserless_client::BrowserlessError) -> Self {
        use browserless_client::BrowserlessError;
        match err {
            BrowserlessError::Api { status: 408, .. } => FetchError::Timeout(Duration::ZERO),
            other => FetchError::Browser(other.to_string()),
        }
    }
}

impl From<apify_client::ApifyError> for FetchError {
    fn from(err: apify_client::ApifyError) -> Self {
        use apify_client::ApifyError;
        match err {
            ApifyError::RateLimited => FetchError::Status {
                status: 429,
                url: "apify".to_string(),
            },
            ApifyError::Parse(msg) => FetchError::Parse(msg),
            // A rejected token says nothing about the post.
            other => FetchError::Scraper(other.to_string()),
        }
    }
}

/// Outcome of a single tier that produced no candidates.
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    /// The strategy has no tier at this index.
    #[error("strategy exhausted at tier {0}")]
    Exhausted(usize),

    /// The tier needs a collaborator that was not configured (no scraper token, no browser).
    #[error("tier not configured: {0}")]
    Skipped(&'static str),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The tier saw a definite page-level outcome (deleted post, login wall, challenge page).
    #[error("{reason}: {message}")]
    Failure {
        reason: FailureReason,
        message: String,
    },
}

impl TierError {
    pub fn failure(reason: FailureReason, message: impl Into<String>) -> Self {
        TierError::Failure {
            reason,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::failure(FailureReason::MalformedResponse, message)
    }

    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            TierError::Exhausted(_) | TierError::Skipped(_) => None,
            TierError::Fetch(err) => err.reason(),
            TierError::Failure { reason, .. } => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_failure_reasons() {
        let status = |s| FetchError::Status {
            status: s,
            url: "https://x".into(),
        };
        assert_eq!(status(404).reason(), Some(FailureReason::NotFound));
        assert_eq!(status(403).reason(), Some(FailureReason::Blocked));
        assert_eq!(status(429).reason(), Some(FailureReason::RateLimited));
        assert_eq!(status(500).reason(), None);
    }

    #[test]
    fn redirect_exhaustion_is_blocked_not_missing() {
        let err = FetchError::TooManyRedirects {
            url: "https://fb.watch/x".into(),
            hops: 5,
        };
        assert_eq!(err.reason(), Some(FailureReason::Blocked));
    }
}
