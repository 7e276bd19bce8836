use std::sync::Arc;

use drip_limit::Limiter;
use tower::Layer;

use crate::DripError;
use crate::LimiterConfig;
use crate::RequestLimiter;
use crate::service::LimiterService;

/// Applies rate limiting to the requests of any HTTP client service.
///
/// This is the transport adapter form of the limiter: it wraps the client
/// itself (for example a `reqwest::Client`, which is a `tower::Service`), so
/// limits hold no matter which code path builds the requests. With one or more
/// [mounted](Self::mount) prefixes, only requests whose URL starts with one of
/// them are limited; everything else passes straight through.
#[derive(Debug, Clone)]
pub struct LimiterLayer {
    limiter: Arc<RequestLimiter>,
    prefixes: Arc<[String]>,
}

impl LimiterLayer {
    /// Create a LimiterLayer
    pub fn new(config: LimiterConfig) -> Result<Self, DripError> {
        Ok(Self::from_limiter(Arc::new(RequestLimiter::new(config)?)))
    }

    /// A layer that uses `limiter` instead of the rates in `config`.
    pub fn with_limiter(limiter: Limiter, config: LimiterConfig) -> Self {
        Self::from_limiter(Arc::new(RequestLimiter::with_limiter(limiter, config)))
    }

    /// A layer sharing `limiter` with other layers or sessions.
    pub fn from_limiter(limiter: Arc<RequestLimiter>) -> Self {
        Self {
            limiter,
            prefixes: Arc::from([]),
        }
    }

    /// Only limit requests whose URL starts with `prefix`.
    ///
    /// May be called several times; a request is limited if it matches any
    /// mounted prefix.
    pub fn mount(self, prefix: impl Into<String>) -> Self {
        let mut prefixes = self.prefixes.to_vec();
        prefixes.push(prefix.into());
        Self {
            limiter: self.limiter,
            prefixes: prefixes.into(),
        }
    }

    pub fn limiter(&self) -> &Arc<RequestLimiter> {
        &self.limiter
    }
}

impl<S> Layer<S> for LimiterLayer {
    type Service = LimiterService<S>;

    fn layer(&self, service: S) -> Self::Service {
        LimiterService::new(service, Arc::clone(&self.limiter)).with_prefixes(self.prefixes.clone())
    }
}
