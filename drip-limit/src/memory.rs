use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::Bucket;
use crate::BucketError;
use crate::Rate;
use crate::RateItem;
use crate::bucket::check_weight;
use crate::bucket::validate_rates;

/// A bucket that keeps its log in process memory.
///
/// Every admitted unit is recorded as a timestamp in a sorted log. The log is
/// leaked lazily while admitting new items, so no background task is needed.
/// Time is read from the tokio clock, which means a paused runtime drives the
/// bucket deterministically in tests.
#[derive(Debug)]
pub struct InMemoryBucket {
    rates: Vec<Rate>,
    items: Mutex<VecDeque<u64>>,
    anchor: Instant,
}

impl InMemoryBucket {
    /// Creates an empty bucket tracking `rates`.
    ///
    /// An empty list of rates produces a bucket that admits everything.
    ///
    /// # Errors
    ///
    /// Returns [`BucketError::InvalidRate`] if any rate has a zero limit or an
    /// interval shorter than one millisecond.
    pub fn new(rates: Vec<Rate>) -> Result<Self, BucketError> {
        Ok(Self {
            rates: validate_rates(rates)?,
            items: Mutex::new(VecDeque::new()),
            anchor: Instant::now(),
        })
    }

    fn leak_until(&self, items: &mut VecDeque<u64>, now: u64) -> usize {
        let Some(largest) = self.rates.last() else {
            let leaked = items.len();
            items.clear();
            return leaked;
        };
        let interval = largest.interval_ms();
        let expired = items.partition_point(|ts| ts + interval <= now);
        items.drain(..expired);
        expired
    }
}

/// Index of the first unit still inside `rate`'s window at `now`.
fn window_start(items: &VecDeque<u64>, rate: &Rate, now: u64) -> usize {
    let interval = rate.interval_ms();
    items.partition_point(|ts| ts + interval <= now)
}

#[async_trait]
impl Bucket for InMemoryBucket {
    fn rates(&self) -> &[Rate] {
        &self.rates
    }

    fn now(&self) -> u64 {
        Instant::now().duration_since(self.anchor).as_millis() as u64
    }

    async fn put(&self, item: &RateItem) -> Result<bool, BucketError> {
        check_weight(&self.rates, item.weight())?;
        let now = item.timestamp();
        let mut items = self.items.lock();
        self.leak_until(&mut items, now);

        for rate in &self.rates {
            let held = items.len() - window_start(&items, rate, now);
            if held + item.weight() > rate.limit() {
                return Ok(false);
            }
        }

        // Items may be stamped slightly in the past by a slow caller; keep the log sorted.
        let at = items.partition_point(|ts| *ts <= now);
        for _ in 0..item.weight() {
            items.insert(at, now);
        }
        Ok(true)
    }

    async fn waiting(&self, item: &RateItem) -> Result<Duration, BucketError> {
        check_weight(&self.rates, item.weight())?;
        let now = item.timestamp();
        let items = self.items.lock();

        let mut wait = 0;
        for rate in &self.rates {
            let start = window_start(&items, rate, now);
            let needed = items.len() - start + item.weight();
            if needed > rate.limit() {
                // The unit that has to age out before this item fits
                let blocking = items[start + (needed - rate.limit() - 1)];
                wait = wait.max((blocking + rate.interval_ms()).saturating_sub(now));
            }
        }
        Ok(Duration::from_millis(wait))
    }

    async fn leak(&self) -> Result<usize, BucketError> {
        let now = self.now();
        let mut items = self.items.lock();
        Ok(self.leak_until(&mut items, now))
    }

    async fn count(&self) -> Result<usize, BucketError> {
        Ok(self.items.lock().len())
    }

    async fn flush(&self) -> Result<(), BucketError> {
        self.items.lock().clear();
        Ok(())
    }
}
