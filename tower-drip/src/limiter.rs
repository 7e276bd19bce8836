use std::sync::Arc;
use std::time::Duration;

use drip_limit::Limiter;
use drip_limit::RateItem;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::DripError;
use crate::HostBucketFactory;
use crate::LimiterConfig;
use crate::RequestTarget;

#[derive(Clone, Debug)]
struct RequestLimiterMetrics {
    delayed: Counter<u64>,
    fills: Counter<u64>,
}

impl RequestLimiterMetrics {
    fn new() -> Self {
        let meter = global::meter("tower_drip");
        Self {
            delayed: meter.u64_counter("drip.delayed_requests").build(),
            fills: meter.u64_counter("drip.bucket_fills").build(),
        }
    }
}

/// The request and response hooks shared by every composition point.
///
/// Before a request is sent, [`acquire`](Self::acquire) waits for budget in the
/// bucket the request maps to. After the response arrives,
/// [`record_status`](Self::record_status) fills that bucket if the server says
/// its own limit was exceeded, so the next request waits out the server's
/// window.
#[derive(Debug)]
pub struct RequestLimiter {
    limiter: Arc<Limiter>,
    custom_limiter: bool,
    per_host: bool,
    bucket_name: Option<String>,
    default_bucket: String,
    limit_statuses: Vec<u16>,
    max_delay: Option<Duration>,
    instruments: RequestLimiterMetrics,
}

impl RequestLimiter {
    /// Builds the limiter described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DripError::Config`] if the configured rates are unusable.
    pub fn new(config: LimiterConfig) -> Result<Self, DripError> {
        let rates = config.rates()?;
        if !rates.is_empty() {
            debug!(
                rates = %rates.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                "Creating limiter"
            );
        }

        let factory = HostBucketFactory::new(rates, config.backend.clone());
        #[cfg(feature = "sqlite")]
        let factory = factory.with_table(config.table());

        Ok(Self::build(Limiter::new(factory), false, config))
    }

    /// Uses a prepared limiter instead of the rates in `config`.
    ///
    /// The remaining settings (bucket selection, `max_delay`, limit statuses)
    /// still apply.
    pub fn with_limiter(limiter: Limiter, config: LimiterConfig) -> Self {
        Self::build(limiter, true, config)
    }

    fn build(limiter: Limiter, custom_limiter: bool, config: LimiterConfig) -> Self {
        Self {
            limiter: Arc::new(limiter),
            custom_limiter,
            per_host: config.per_host,
            bucket_name: config.bucket_name.filter(|name| !name.is_empty()),
            default_bucket: Uuid::new_v4().to_string(),
            limit_statuses: config.limit_statuses,
            max_delay: config.max_delay,
            instruments: RequestLimiterMetrics::new(),
        }
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// True if the limiter was supplied by the caller rather than built from rates.
    pub fn is_custom(&self) -> bool {
        self.custom_limiter
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    pub fn limit_statuses(&self) -> &[u16] {
        &self.limit_statuses
    }

    /// The bucket a request is accounted in.
    ///
    /// A configured bucket name always wins. Otherwise requests are keyed by
    /// origin when tracking per host, or share a bucket unique to this limiter.
    pub fn bucket_name(&self, target: &(impl RequestTarget + ?Sized)) -> String {
        if let Some(name) = &self.bucket_name {
            name.clone()
        } else if self.per_host {
            target.origin()
        } else {
            self.default_bucket.clone()
        }
    }

    /// Waits for budget in bucket `key`, returning how long that took.
    ///
    /// # Errors
    ///
    /// Fails without waiting if the wait would exceed the configured `max_delay`.
    pub async fn acquire(&self, key: &str) -> Result<Duration, DripError> {
        let waited = self.limiter.acquire_within(key, 1, self.max_delay).await?;
        if !waited.is_zero() {
            self.instruments
                .delayed
                .add(1, &[KeyValue::new("bucket", key.to_string())]);
        }
        Ok(waited)
    }

    pub fn is_limit_status(&self, status: u16) -> bool {
        self.limit_statuses.contains(&status)
    }

    /// Fills bucket `key` if `status` reports an exceeded limit.
    ///
    /// A bucket backend failure is logged rather than returned, so the caller
    /// still receives the response it already has.
    pub async fn record_status(&self, key: &str, url: &str, status: u16) {
        if !self.is_limit_status(status) {
            return;
        }
        if let Err(err) = self.fill(key, url).await {
            warn!(bucket = key, %err, "Failed to fill limiter bucket");
        }
    }

    /// Saturates the smallest rate of bucket `key`, requiring an extra delay
    /// before its next request.
    ///
    /// When the server tracks several limits there is no telling which one was
    /// exceeded, so the shortest interval is used: if 40 of 60 requests per
    /// minute were tracked locally when a 429 arrived, 20 filler units are
    /// added. A longer server-side limit is then approached one short interval
    /// at a time.
    pub async fn fill(&self, key: &str, url: &str) -> Result<(), DripError> {
        info!(url, bucket = key, "Rate limit exceeded; filling limiter bucket");
        let bucket = self.limiter.bucket(key).await?;

        if bucket.smallest_rate().is_none() {
            warn!(bucket = key, "No rates available to fill");
            return Ok(());
        }

        // Largest batches first, halving on refusal, so the remaining room is
        // taken in a handful of puts rather than one put per unit.
        let now = bucket.now();
        let mut weight = bucket
            .rates()
            .iter()
            .map(|rate| rate.limit())
            .min()
            .unwrap_or_default();
        let mut added = 0;
        while weight > 0 {
            if bucket.put(&RateItem::new(key, now, weight)).await? {
                added += weight;
            } else {
                weight /= 2;
            }
        }
        debug!(bucket = key, added, "Filled limiter bucket");

        self.instruments
            .fills
            .add(1, &[KeyValue::new("bucket", key.to_string())]);
        Ok(())
    }
}
