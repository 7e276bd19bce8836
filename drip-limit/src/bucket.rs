use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::Rate;

/// Errors produced by buckets and their backends.
#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    /// A rate with a zero limit or an interval shorter than one millisecond.
    #[error("invalid rate {0}: limit must be non-zero and interval at least 1ms")]
    InvalidRate(Rate),

    /// The item could never fit, no matter how long the caller waits.
    #[error("item weight {weight} exceeds the limit of rate {rate}")]
    WeightExceedsLimit { weight: usize, rate: Rate },

    /// Table names are interpolated into SQL and must be plain identifiers.
    #[error("invalid table name {0:?}")]
    InvalidTable(String),

    #[cfg(feature = "sqlite")]
    #[error("sqlite backend error: {0}")]
    Sqlite(#[from] sqlx::Error),
}

/// A unit of work to be admitted by a bucket.
///
/// The timestamp is expressed in milliseconds on the clock of the bucket the
/// item is destined for, see [`Bucket::now`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateItem {
    name: String,
    timestamp: u64,
    weight: usize,
}

impl RateItem {
    pub fn new(name: impl Into<String>, timestamp: u64, weight: usize) -> Self {
        Self {
            name: name.into(),
            timestamp,
            weight,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn weight(&self) -> usize {
        self.weight
    }
}

/// The accounting unit shared by every backend.
///
/// Buckets must be `Send` and `Sync` so that a single instance can be shared
/// through an `Arc` by every task sending to the same key.
#[async_trait]
pub trait Bucket: Debug + Send + Sync {
    /// The tracked rates, sorted by ascending interval.
    fn rates(&self) -> &[Rate];

    /// Current time in milliseconds on this bucket's clock.
    fn now(&self) -> u64;

    /// Admits the item if every rate has room for its weight.
    ///
    /// Returns `Ok(false)` without recording anything when any rate is full.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::WeightExceedsLimit`] if the weight is larger than
    /// the limit of any rate.
    async fn put(&self, item: &RateItem) -> Result<bool, BucketError>;

    /// How long until `put` would admit the item. Zero if it fits now.
    async fn waiting(&self, item: &RateItem) -> Result<Duration, BucketError>;

    /// Removes items older than the largest interval and returns how many went.
    async fn leak(&self) -> Result<usize, BucketError>;

    /// Number of units currently held.
    async fn count(&self) -> Result<usize, BucketError>;

    /// Removes everything.
    async fn flush(&self) -> Result<(), BucketError>;

    /// The rate with the shortest interval, if any.
    fn smallest_rate(&self) -> Option<Rate> {
        self.rates().first().copied()
    }
}

/// Sorts rates by interval and rejects the ones a bucket cannot honour.
pub(crate) fn validate_rates(mut rates: Vec<Rate>) -> Result<Vec<Rate>, BucketError> {
    if let Some(rate) = rates.iter().find(|rate| !rate.is_valid()) {
        return Err(BucketError::InvalidRate(*rate));
    }
    rates.sort_by_key(|rate| rate.interval());
    Ok(rates)
}

pub(crate) fn check_weight(rates: &[Rate], weight: usize) -> Result<(), BucketError> {
    match rates.iter().find(|rate| weight > rate.limit()) {
        Some(rate) => Err(BucketError::WeightExceedsLimit {
            weight,
            rate: *rate,
        }),
        None => Ok(()),
    }
}
