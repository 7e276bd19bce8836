use std::fmt;
use std::time::Duration;

pub const SECOND: Duration = Duration::from_secs(1);
pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(60 * 60);
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// A month is treated as 30 days.
pub const MONTH: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// A limit of `limit` units per `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate {
    limit: usize,
    interval: Duration,
}

impl Rate {
    pub const fn new(limit: usize, interval: Duration) -> Self {
        Self { limit, interval }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The interval in whole milliseconds, which is the resolution buckets work in.
    pub fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.limit > 0 && self.interval_ms() > 0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.limit, self.interval)
    }
}
