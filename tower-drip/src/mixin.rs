use std::future::Future;

use reqwest::Request;
use reqwest::Response;

use crate::DripError;
use crate::RequestLimiter;

/// Adds rate limiting to any client type.
///
/// Implementors expose their [`RequestLimiter`] and how they send a request
/// without limiting; [`execute`](Self::execute) then wraps every send in the
/// acquire and fill hooks.
///
/// ```rust,no_run
/// use std::future::Future;
///
/// use reqwest::Client;
/// use reqwest::Request;
/// use reqwest::Response;
/// use tower_drip::LimiterConfig;
/// use tower_drip::LimiterMixin;
/// use tower_drip::RequestLimiter;
///
/// struct AuditedClient {
///     client: Client,
///     limiter: RequestLimiter,
/// }
///
/// impl LimiterMixin for AuditedClient {
///     fn request_limiter(&self) -> &RequestLimiter {
///         &self.limiter
///     }
///
///     fn dispatch(&self, request: Request) -> impl Future<Output = reqwest::Result<Response>> + Send {
///         self.client.execute(request)
///     }
/// }
///
/// # async fn run() -> Result<(), tower_drip::DripError> {
/// let client = AuditedClient {
///     client: Client::new(),
///     limiter: RequestLimiter::new(LimiterConfig::per_second(5.0))?,
/// };
/// let request = client.client.get("https://example.com").build()?;
/// let _response = client.execute(request).await?;
/// # Ok(())
/// # }
/// ```
pub trait LimiterMixin: Send + Sync {
    fn request_limiter(&self) -> &RequestLimiter;

    /// Sends `request` without any rate limiting.
    fn dispatch(&self, request: Request) -> impl Future<Output = reqwest::Result<Response>> + Send;

    /// Sends `request` once budget is available, filling the bucket if the
    /// response reports an exceeded limit.
    ///
    /// # Errors
    ///
    /// Returns [`DripError::Limit`] if waiting would exceed `max_delay`, and
    /// [`DripError::Http`] if the request itself fails.
    fn execute(&self, request: Request) -> impl Future<Output = Result<Response, DripError>> + Send {
        async move {
            let limiter = self.request_limiter();
            let key = limiter.bucket_name(&request);
            let url = request.url().to_string();

            limiter.acquire(&key).await?;
            let response = self.dispatch(request).await?;
            limiter
                .record_status(&key, &url, response.status().as_u16())
                .await;

            Ok(response)
        }
    }
}
