use std::future::Future;
use std::sync::Arc;

use drip_limit::Limiter;
use reqwest::Client;
use reqwest::IntoUrl;
use reqwest::Method;
use reqwest::Request;
use reqwest::RequestBuilder;
use reqwest::Response;

use crate::DripError;
use crate::LimiterConfig;
use crate::LimiterMixin;
use crate::RequestLimiter;

/// A `reqwest` client that rate limits every request it sends.
///
/// Clones share the client's connection pool and the limiter's buckets.
#[derive(Debug, Clone)]
pub struct LimiterSession {
    client: Client,
    limiter: Arc<RequestLimiter>,
}

impl LimiterSession {
    /// A session over a default `reqwest::Client`.
    pub fn new(config: LimiterConfig) -> Result<Self, DripError> {
        Self::with_client(Client::new(), config)
    }

    /// A session over a preconfigured client (timeouts, default headers, proxies).
    pub fn with_client(client: Client, config: LimiterConfig) -> Result<Self, DripError> {
        Ok(Self::from_limiter(
            client,
            Arc::new(RequestLimiter::new(config)?),
        ))
    }

    /// A session that uses `limiter` instead of the rates in `config`.
    pub fn with_limiter(limiter: Limiter, config: LimiterConfig) -> Self {
        Self::from_limiter(
            Client::new(),
            Arc::new(RequestLimiter::with_limiter(limiter, config)),
        )
    }

    /// A session sharing `limiter`, e.g. with a [`LimiterLayer`](crate::LimiterLayer).
    pub fn from_limiter(client: Client, limiter: Arc<RequestLimiter>) -> Self {
        Self { client, limiter }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn limiter(&self) -> &Arc<RequestLimiter> {
        &self.limiter
    }

    /// Starts building a request; send it with [`send`](Self::send).
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.post(url)
    }

    /// Builds and sends `builder` once budget is available.
    ///
    /// The builder may come from any client; it is always sent through this
    /// session's client.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, DripError> {
        let (_, request) = builder.build_split();
        self.execute(request?).await
    }
}

impl LimiterMixin for LimiterSession {
    fn request_limiter(&self) -> &RequestLimiter {
        &self.limiter
    }

    fn dispatch(&self, request: Request) -> impl Future<Output = reqwest::Result<Response>> + Send {
        self.client.execute(request)
    }
}
