//! # drip-limit
//!
//! `drip-limit` provides leaky bucket rate limiting with support for several
//! limits at once (for example 5 per second *and* 100 per minute).
//!
//! ## Key Concepts
//!
//! * **Rate**: a limit of `n` units per `interval`. A bucket may track any
//!   number of rates and admits an item only if every one of them has room.
//! * **Bucket**: the accounting unit. Buckets record the timestamps of
//!   admitted items and leak them once they age past the largest interval.
//! * **Backends**: [`InMemoryBucket`] keeps its log in process memory,
//!   `SqliteBucket` (feature `sqlite`) stores it in a SQLite file so that
//!   several processes can share one budget.
//! * **Limiter**: resolves a bucket by name through a [`BucketFactory`] and
//!   either tries once or waits until budget is available.
//!
//! ## Example
//!
//! ```rust
//! use drip_limit::InMemoryBucket;
//! use drip_limit::Limiter;
//! use drip_limit::Rate;
//! use drip_limit::SECOND;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bucket = InMemoryBucket::new(vec![Rate::new(5, SECOND)])?;
//! let limiter = Limiter::from_bucket(bucket);
//!
//! if limiter.try_acquire("api", 1).await? {
//!     // Request allowed
//! }
//! # Ok(())
//! # }
//! ```

mod bucket;
mod factory;
mod limiter;
mod memory;
mod rate;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use bucket::Bucket;
pub use bucket::BucketError;
pub use bucket::RateItem;
pub use factory::BucketFactory;
pub use factory::SingleBucketFactory;
pub use limiter::DEFAULT_BUFFER;
pub use limiter::LimitError;
pub use limiter::Limiter;
pub use memory::InMemoryBucket;
pub use rate::DAY;
pub use rate::HOUR;
pub use rate::MINUTE;
pub use rate::MONTH;
pub use rate::Rate;
pub use rate::SECOND;
pub use rate::WEEK;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBucket;
