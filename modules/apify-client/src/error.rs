use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApifyError>;

#[derive(Debug, Error)]
pub enum ApifyError {
    #[error("Network error: {0}")]
    Network(String),

    /// The API token was rejected or lacks access to the actor.
    #[error("Unauthorized (status {status})")]
    Unauthorized { status: u16 },

    /// Account or platform-wide rate limit on the Apify side.
    #[error("Rate limited by Apify")]
    RateLimited,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Run {run_id} ended with status {status}")]
    RunFailed { run_id: String, status: String },
}

impl ApifyError {
    /// Classify a non-success API response.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ApifyError::Unauthorized { status },
            429 => ApifyError::RateLimited,
            _ => ApifyError::Api {
                status,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for ApifyError {
    fn from(err: reqwest::Error) -> Self {
        ApifyError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ApifyError {
    fn from(err: serde_json::Error) -> Self {
        ApifyError::Parse(err.to_string())
    }
}
