//! # Tower Drip
//!
//! `tower-drip` rate limits outgoing HTTP requests with a leaky bucket from
//! [`drip_limit`], keeping each remote host inside its published limits.
//!
//! ## Composition Points
//!
//! The same limiting hooks ([`RequestLimiter`]) are offered three ways:
//!
//! 1. **[`LimiterSession`]**: a `reqwest` client wrapper that limits every
//!    request it sends.
//! 2. **[`LimiterLayer`]**: a `tower::Layer` around any HTTP client service,
//!    optionally restricted to [mounted](LimiterLayer::mount) URL prefixes.
//! 3. **[`LimiterMixin`]**: a trait that adds limiting to your own client type.
//!
//! ## Behaviour
//!
//! * Requests are tracked per host (scheme, host and port) by default, or in
//!   one named bucket shared across sessions.
//! * When a bucket is full the request waits until it drains, or fails with
//!   [`DripError::Limit`] if the wait would exceed `max_delay`.
//! * A `429 Too Many Requests` response (or any configured status) fills the
//!   bucket, so the next request waits out the server's window.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tower_drip::LimiterConfig;
//! use tower_drip::LimiterSession;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), tower_drip::DripError> {
//! let session = LimiterSession::new(LimiterConfig::per_second(5.0).with_per_minute(100.0))?;
//! let response = session.send(session.get("https://httpbin.org/get")).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` (default): [`Backend::Sqlite`] stores buckets in a SQLite file so
//!   that several sessions or processes share one budget.

mod config;
mod error;
mod layer;
mod limiter;
mod mixin;
mod rate;
mod registry;
mod service;
mod session;
mod target;

#[cfg(test)]
mod tests;

pub use config::Backend;
pub use config::LimiterConfig;
pub use error::DripError;
pub use layer::LimiterLayer;
pub use limiter::RequestLimiter;
pub use mixin::LimiterMixin;
pub use rate::convert_rate;
pub use registry::HostBucketFactory;
pub use service::LimiterService;
pub use service::ResponseFuture;
pub use session::LimiterSession;
pub use target::RequestTarget;
pub use target::ResponseStatus;

pub use drip_limit;
