use drip_limit::BucketError;
use drip_limit::LimitError;

/// Errors produced by the rate limited sessions and services.
#[derive(Debug, thiserror::Error)]
pub enum DripError {
    /// The configured rates cannot be turned into a limiter.
    #[error("invalid rate limit configuration: {0}")]
    Config(String),

    /// Budget could not be acquired, usually because `max_delay` would be exceeded.
    #[error(transparent)]
    Limit(#[from] LimitError),

    /// The bucket backend failed.
    #[error(transparent)]
    Bucket(#[from] BucketError),

    /// The request itself failed after budget was acquired.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl DripError {
    /// True if the request was abandoned because waiting would exceed `max_delay`.
    pub fn is_delay_exceeded(&self) -> bool {
        matches!(self, Self::Limit(LimitError::DelayExceeded { .. }))
    }
}
