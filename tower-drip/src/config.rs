use std::time::Duration;

#[cfg(feature = "sqlite")]
use std::path::PathBuf;

use drip_limit::DAY;
use drip_limit::HOUR;
use drip_limit::MINUTE;
use drip_limit::MONTH;
use drip_limit::Rate;
use serde::Deserialize;
use serde::Serialize;

use crate::DripError;
use crate::rate::convert_rate;

/// Where buckets keep their state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// Process memory; state is lost when the limiter is dropped.
    #[default]
    Memory,

    /// A SQLite file that several sessions or processes may share.
    ///
    /// Without an explicit `table`, a session with a `bucket_name` uses
    /// `bucket_{name}` and every other session uses `rate_bucket`.
    #[cfg(feature = "sqlite")]
    Sqlite {
        path: PathBuf,
        #[serde(default)]
        table: Option<String>,
    },
}

/// Settings shared by [`LimiterSession`](crate::LimiterSession),
/// [`LimiterLayer`](crate::LimiterLayer) and any
/// [`LimiterMixin`](crate::LimiterMixin) implementation.
///
/// The `per_*` settings cover the common intervals and may be fractional, e.g.
/// `0.5` per second means one request every two seconds. For anything more
/// elaborate, hand a prepared [`drip_limit::Limiter`] to
/// [`RequestLimiter::with_limiter`](crate::RequestLimiter::with_limiter).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    pub per_second: f64,
    pub per_minute: f64,
    pub per_hour: f64,
    pub per_day: f64,
    pub per_month: f64,
    /// Number of consecutive requests allowed before per-second limiting applies.
    pub burst: f64,
    pub backend: Backend,
    /// Longest a request may wait for budget before failing.
    pub max_delay: Option<Duration>,
    /// Track limits separately for each scheme and host.
    pub per_host: bool,
    /// Response statuses that mean the server-side limit was exceeded.
    pub limit_statuses: Vec<u16>,
    /// A fixed bucket for every request, overriding `per_host`.
    pub bucket_name: Option<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            per_second: 0.0,
            per_minute: 0.0,
            per_hour: 0.0,
            per_day: 0.0,
            per_month: 0.0,
            burst: 1.0,
            backend: Backend::Memory,
            max_delay: None,
            per_host: true,
            limit_statuses: vec![429],
            bucket_name: None,
        }
    }
}

impl LimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn per_second(limit: f64) -> Self {
        Self::default().with_per_second(limit)
    }

    pub fn with_per_second(mut self, limit: f64) -> Self {
        self.per_second = limit;
        self
    }

    pub fn with_per_minute(mut self, limit: f64) -> Self {
        self.per_minute = limit;
        self
    }

    pub fn with_per_hour(mut self, limit: f64) -> Self {
        self.per_hour = limit;
        self
    }

    pub fn with_per_day(mut self, limit: f64) -> Self {
        self.per_day = limit;
        self
    }

    pub fn with_per_month(mut self, limit: f64) -> Self {
        self.per_month = limit;
        self
    }

    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_per_host(mut self, per_host: bool) -> Self {
        self.per_host = per_host;
        self
    }

    pub fn with_limit_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.limit_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_bucket_name(mut self, name: impl Into<String>) -> Self {
        self.bucket_name = Some(name.into());
        self
    }

    /// The whole-number rates described by the `per_*` and `burst` settings.
    ///
    /// # Errors
    ///
    /// Returns [`DripError::Config`] for negative or non-finite settings, a
    /// non-positive burst, or a limit too small to represent.
    pub fn rates(&self) -> Result<Vec<Rate>, DripError> {
        if !self.burst.is_finite() || self.burst <= 0.0 {
            return Err(DripError::Config(format!(
                "burst must be positive, got {}",
                self.burst
            )));
        }

        let burst_interval = Duration::from_millis((1000.0 * self.burst) as u64);
        [
            (burst_interval, self.per_second * self.burst),
            (MINUTE, self.per_minute),
            (HOUR, self.per_hour),
            (DAY, self.per_day),
            (MONTH, self.per_month),
        ]
        .into_iter()
        .filter(|(_, limit)| *limit != 0.0)
        .map(|(interval, limit)| convert_rate(limit, interval))
        .collect()
    }

    /// The SQLite table a bucket of this configuration lives in.
    #[cfg(feature = "sqlite")]
    pub(crate) fn table(&self) -> String {
        if let Backend::Sqlite {
            table: Some(table), ..
        } = &self.backend
        {
            return table.clone();
        }
        match self.bucket_name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => format!(
                "bucket_{}",
                name.chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect::<String>()
            ),
            None => drip_limit::sqlite::DEFAULT_TABLE.to_string(),
        }
    }
}
