use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::future::BoxFuture;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;

use crate::RequestLimiter;
use crate::RequestTarget;
use crate::ResponseStatus;

/// A service that waits for rate limit budget before calling its inner service.
#[derive(Debug, Clone)]
pub struct LimiterService<S> {
    inner: S,
    limiter: Arc<RequestLimiter>,
    prefixes: Arc<[String]>,
}

pin_project! {
    /// Either a limited call or a call that bypassed the limiter.
    #[project = ResponseFutureProj]
    pub enum ResponseFuture<F, T> {
        Limited {
            inner: BoxFuture<'static, Result<T, BoxError>>,
        },
        Passthrough {
            #[pin]
            inner: F,
        },
    }
}

impl<F, T, E> Future for ResponseFuture<F, T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Limited { inner } => inner.as_mut().poll(cx),
            ResponseFutureProj::Passthrough { inner } => inner.poll(cx).map_err(Into::into),
        }
    }
}

impl<S> LimiterService<S> {
    pub fn new(inner: S, limiter: Arc<RequestLimiter>) -> Self {
        Self {
            inner,
            limiter,
            prefixes: Arc::from([]),
        }
    }

    /// Only limit requests whose URL starts with one of `prefixes`. An empty
    /// list limits everything.
    pub fn with_prefixes(mut self, prefixes: Arc<[String]>) -> Self {
        self.prefixes = prefixes;
        self
    }

    pub fn limiter(&self) -> &Arc<RequestLimiter> {
        &self.limiter
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn is_mounted(&self, url: &str) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|prefix| url.starts_with(prefix.as_str()))
    }
}

impl<S, Req> Service<Req> for LimiterService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: ResponseStatus + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    Req: RequestTarget + Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future, S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let url = req.url().into_owned();
        if !self.is_mounted(&url) {
            return ResponseFuture::Passthrough {
                inner: self.inner.call(req),
            };
        }

        // The instance that was polled ready goes into the future; waiting for
        // budget may take a while, so readiness is checked again afterwards.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let limiter = Arc::clone(&self.limiter);

        ResponseFuture::Limited {
            inner: Box::pin(async move {
                let key = limiter.bucket_name(&req);
                limiter.acquire(&key).await?;

                let response = inner
                    .oneshot(req)
                    .await
                    .map_err(Into::into)?;
                limiter
                    .record_status(&key, &url, response.status_code())
                    .await;

                Ok(response)
            }),
        }
    }
}
