use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio::time::sleep;
use tracing::trace;

use crate::Bucket;
use crate::BucketError;
use crate::BucketFactory;
use crate::RateItem;
use crate::SingleBucketFactory;

/// Extra time added to every computed wait, so a woken caller does not race
/// the unit it was waiting on.
pub const DEFAULT_BUFFER: Duration = Duration::from_millis(50);

/// Errors produced while acquiring budget.
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    /// Admission would take longer than the caller is prepared to wait.
    #[error(
        "bucket {name:?} is full; waiting another {delay:?} after {waited:?} would exceed the maximum delay of {max_delay:?}"
    )]
    DelayExceeded {
        name: String,
        /// Predicted wait until the bucket has room.
        delay: Duration,
        /// Time already spent waiting.
        waited: Duration,
        max_delay: Duration,
    },

    #[error(transparent)]
    Bucket(#[from] BucketError),
}

/// Admits work against named buckets.
#[derive(Debug, Clone)]
pub struct Limiter {
    factory: Arc<dyn BucketFactory>,
    buffer: Duration,
}

impl Limiter {
    pub fn new(factory: impl BucketFactory + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            buffer: DEFAULT_BUFFER,
        }
    }

    /// A limiter where every name shares `bucket`.
    pub fn from_bucket(bucket: impl Bucket + 'static) -> Self {
        Self::new(SingleBucketFactory::new(Arc::new(bucket)))
    }

    /// Set the time added to every computed wait.
    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn factory(&self) -> &Arc<dyn BucketFactory> {
        &self.factory
    }

    pub async fn bucket(&self, name: &str) -> Result<Arc<dyn Bucket>, BucketError> {
        self.factory.get(name).await
    }

    /// Attempts to admit `weight` units for `name` without waiting.
    pub async fn try_acquire(&self, name: &str, weight: usize) -> Result<bool, LimitError> {
        let bucket = self.bucket(name).await?;
        let item = RateItem::new(name, bucket.now(), weight);
        Ok(bucket.put(&item).await?)
    }

    /// Waits for as long as it takes to admit `weight` units for `name`.
    pub async fn acquire(&self, name: &str, weight: usize) -> Result<Duration, LimitError> {
        self.acquire_within(name, weight, None).await
    }

    /// Waits until `weight` units for `name` are admitted, returning the time spent waiting.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::DelayExceeded`] as soon as the time already spent
    /// plus the next predicted wait exceeds `max_delay`. Nothing is recorded in
    /// the bucket in that case.
    pub async fn acquire_within(
        &self,
        name: &str,
        weight: usize,
        max_delay: Option<Duration>,
    ) -> Result<Duration, LimitError> {
        let bucket = self.bucket(name).await?;
        let start = Instant::now();

        loop {
            let item = RateItem::new(name, bucket.now(), weight);
            if bucket.put(&item).await? {
                return Ok(start.elapsed());
            }

            let delay = bucket.waiting(&item).await? + self.buffer;
            if let Some(max_delay) = max_delay {
                let waited = start.elapsed();
                if waited + delay > max_delay {
                    return Err(LimitError::DelayExceeded {
                        name: name.to_string(),
                        delay,
                        waited,
                        max_delay,
                    });
                }
            }

            trace!(bucket = name, ?delay, "Bucket full, waiting");
            sleep(delay).await;
        }
    }
}
