use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use drip_limit::InMemoryBucket;
use drip_limit::Limiter;
use drip_limit::Rate;
use drip_limit::SECOND;
use http::Request;
use http::Response;
use http::StatusCode;
use more_asserts::assert_ge;
use more_asserts::assert_lt;
use tokio::time::Instant;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::service_fn;
use tower_test::mock;

use super::*;

/// Answers with the status named by the last path segment, e.g. `/429`.
fn status_service(
    calls: Arc<AtomicUsize>,
) -> impl Service<
    Request<()>,
    Response = Response<()>,
    Error = BoxError,
    Future = impl Future<Output = Result<Response<()>, BoxError>> + Send,
> + Clone
+ Send
+ 'static {
    service_fn(move |req: Request<()>| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let status = req
                .uri()
                .path()
                .rsplit('/')
                .next()
                .and_then(|segment| segment.parse::<u16>().ok())
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::OK);
            let mut response = Response::new(());
            *response.status_mut() = status;
            Ok::<_, BoxError>(response)
        }
    })
}

fn get(url: &str) -> Request<()> {
    Request::get(url).body(()).unwrap()
}

async fn send<S>(svc: &mut S, url: &str) -> Result<u16, BoxError>
where
    S: Service<Request<()>, Response = Response<()>, Error = BoxError>,
{
    let response = svc.ready().await?.call(get(url)).await?;
    Ok(response.status().as_u16())
}

#[tokio::test(start_paused = true)]
async fn test_requests_over_the_limit_are_delayed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut svc = ServiceBuilder::new()
        .layer(LimiterLayer::new(LimiterConfig::per_second(5.0)).unwrap())
        .service(status_service(calls.clone()));

    let start = Instant::now();
    for _ in 0..5 {
        send(&mut svc, "https://api.example.com/items").await.unwrap();
    }
    assert_lt!(start.elapsed(), Duration::from_millis(100));

    send(&mut svc, "https://api.example.com/items").await.unwrap();
    assert_ge!(start.elapsed(), SECOND);
    assert_eq!(calls.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_limit_status_fills_the_bucket() {
    let mut svc = LimiterLayer::new(LimiterConfig::per_second(5.0))
        .unwrap()
        .layer(status_service(Arc::default()));

    let start = Instant::now();
    let status = send(&mut svc, "https://api.example.com/429").await.unwrap();
    assert_eq!(status, 429);
    assert_lt!(start.elapsed(), Duration::from_millis(100));

    // Only one request was sent, but the server says the window is spent.
    send(&mut svc, "https://api.example.com/items").await.unwrap();
    assert_ge!(start.elapsed(), SECOND);
}

#[tokio::test(start_paused = true)]
async fn test_hosts_are_tracked_independently() {
    let mut svc = LimiterLayer::new(LimiterConfig::per_second(5.0))
        .unwrap()
        .layer(status_service(Arc::default()));

    send(&mut svc, "https://a.example.com/429").await.unwrap();

    let start = Instant::now();
    for _ in 0..5 {
        send(&mut svc, "https://b.example.com/items").await.unwrap();
    }
    assert_lt!(start.elapsed(), Duration::from_millis(100));

    send(&mut svc, "https://a.example.com/items").await.unwrap();
    assert_ge!(start.elapsed(), SECOND);
}

#[tokio::test(start_paused = true)]
async fn test_ports_are_part_of_the_host_key() {
    let mut svc = LimiterLayer::new(LimiterConfig::per_second(5.0))
        .unwrap()
        .layer(status_service(Arc::default()));

    send(&mut svc, "http://localhost:8080/429").await.unwrap();

    let start = Instant::now();
    send(&mut svc, "http://localhost:9090/items").await.unwrap();
    assert_lt!(start.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_shared_bucket_without_per_host_tracking() {
    let mut svc = LimiterLayer::new(LimiterConfig::per_second(5.0).with_per_host(false))
        .unwrap()
        .layer(status_service(Arc::default()));

    let start = Instant::now();
    for host in ["a", "b", "c", "d", "e"] {
        send(&mut svc, &format!("https://{host}.example.com/")).await.unwrap();
    }
    assert_lt!(start.elapsed(), Duration::from_millis(100));

    send(&mut svc, "https://f.example.com/").await.unwrap();
    assert_ge!(start.elapsed(), SECOND);
}

#[tokio::test(start_paused = true)]
async fn test_custom_limit_statuses() {
    let config = LimiterConfig::per_second(5.0).with_limit_statuses([500]);
    let mut svc = LimiterLayer::new(config)
        .unwrap()
        .layer(status_service(Arc::default()));

    let start = Instant::now();
    send(&mut svc, "https://api.example.com/429").await.unwrap();
    send(&mut svc, "https://api.example.com/items").await.unwrap();
    assert_lt!(start.elapsed(), Duration::from_millis(100));

    send(&mut svc, "https://api.example.com/500").await.unwrap();
    send(&mut svc, "https://api.example.com/items").await.unwrap();
    assert_ge!(start.elapsed(), SECOND);
}

#[tokio::test(start_paused = true)]
async fn test_no_limit_statuses_never_fills() {
    let config = LimiterConfig::per_second(5.0).with_limit_statuses([]);
    let mut svc = LimiterLayer::new(config)
        .unwrap()
        .layer(status_service(Arc::default()));

    let start = Instant::now();
    for _ in 0..5 {
        let status = send(&mut svc, "https://api.example.com/429").await.unwrap();
        assert_eq!(status, 429);
    }
    assert_lt!(start.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_max_delay_fails_fast() {
    let config = LimiterConfig::per_second(2.0).with_max_delay(Duration::from_millis(500));
    let calls = Arc::new(AtomicUsize::new(0));
    let mut svc = LimiterLayer::new(config)
        .unwrap()
        .layer(status_service(calls.clone()));

    send(&mut svc, "https://api.example.com/").await.unwrap();
    send(&mut svc, "https://api.example.com/").await.unwrap();

    let start = Instant::now();
    let err = send(&mut svc, "https://api.example.com/").await.unwrap_err();
    let err = err.downcast_ref::<DripError>().expect("a limiter error");
    assert!(err.is_delay_exceeded());
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_mounted_prefixes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let layer = LimiterLayer::new(LimiterConfig::per_second(1.0))
        .unwrap()
        .mount("https://api.example.com/v1/");
    let mut svc = layer.layer(status_service(calls.clone()));

    let start = Instant::now();
    for _ in 0..10 {
        send(&mut svc, "https://api.example.com/health").await.unwrap();
        send(&mut svc, "https://static.example.com/429").await.unwrap();
    }
    send(&mut svc, "https://api.example.com/v1/items").await.unwrap();
    assert_lt!(start.elapsed(), Duration::from_millis(100));

    send(&mut svc, "https://api.example.com/v1/items").await.unwrap();
    assert_ge!(start.elapsed(), SECOND);
    assert_eq!(calls.load(Ordering::SeqCst), 22);
}

#[tokio::test(start_paused = true)]
async fn test_shared_state_across_clones() {
    let layer = LimiterLayer::new(LimiterConfig::per_second(5.0)).unwrap();

    let mut svc1 = layer.layer(status_service(Arc::default()));
    let mut svc2 = layer.layer(status_service(Arc::default()));

    send(&mut svc1, "https://api.example.com/429").await.unwrap();

    let start = Instant::now();
    send(&mut svc2, "https://api.example.com/items").await.unwrap();
    assert_ge!(start.elapsed(), SECOND);
}

#[tokio::test(start_paused = true)]
async fn test_waiting_request_does_not_reach_inner_service() {
    let (inner, mut handle) = mock::pair::<Request<()>, Response<()>>();
    let mut svc = LimiterLayer::new(LimiterConfig::per_second(1.0))
        .unwrap()
        .layer(inner);

    let call = ServiceExt::<Request<()>>::ready(&mut svc)
        .await
        .unwrap()
        .call(get("https://api.example.com/"));
    let first = tokio::spawn(call);
    let (_, reply) = handle.next_request().await.unwrap();
    reply.send_response(Response::new(()));
    first.await.unwrap().unwrap();

    let call = ServiceExt::<Request<()>>::ready(&mut svc)
        .await
        .unwrap()
        .call(get("https://api.example.com/"));
    let second = tokio::spawn(call);

    let early = tokio::time::timeout(Duration::from_millis(500), handle.next_request()).await;
    assert!(early.is_err(), "request passed before budget was available");

    let (req, reply) = handle.next_request().await.unwrap();
    assert_eq!(req.uri(), "https://api.example.com/");
    reply.send_response(Response::new(()));
    second.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_inner_errors_are_returned() {
    let (inner, mut handle) = mock::pair::<Request<()>, Response<()>>();
    let mut svc = LimiterLayer::new(LimiterConfig::per_second(5.0))
        .unwrap()
        .layer(inner);

    let call = ServiceExt::<Request<()>>::ready(&mut svc)
        .await
        .unwrap()
        .call(get("https://api.example.com/"));
    let call = tokio::spawn(call);
    let (_, reply) = handle.next_request().await.unwrap();
    reply.send_error("connection reset");

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "connection reset");
}

#[tokio::test(start_paused = true)]
async fn test_bucket_name_overrides_per_host_tracking() {
    let config = LimiterConfig::per_second(5.0).with_bucket_name("x");
    let mut svc = LimiterLayer::new(config)
        .unwrap()
        .layer(status_service(Arc::default()));

    let start = Instant::now();
    send(&mut svc, "https://a.example.com/429").await.unwrap();
    assert_lt!(start.elapsed(), Duration::from_millis(100));

    send(&mut svc, "https://b.example.com/items").await.unwrap();
    assert_ge!(start.elapsed(), SECOND);
}

#[tokio::test(start_paused = true)]
async fn test_empty_bucket_name_keeps_per_host_tracking() {
    let config = LimiterConfig::per_second(5.0).with_bucket_name("");
    let limiter = RequestLimiter::new(config).unwrap();
    let url = reqwest::Url::parse("https://a.example.com/items").unwrap();
    assert_eq!(limiter.bucket_name(&url), "https://a.example.com");

    let mut svc = LimiterLayer::from_limiter(Arc::new(limiter)).layer(status_service(Arc::default()));
    send(&mut svc, "https://a.example.com/429").await.unwrap();

    let start = Instant::now();
    send(&mut svc, "https://b.example.com/items").await.unwrap();
    assert_lt!(start.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_limit_status_without_rates_is_ignored() {
    let limiter = Arc::new(RequestLimiter::new(LimiterConfig::new()).unwrap());
    let mut svc = LimiterLayer::from_limiter(Arc::clone(&limiter)).layer(status_service(Arc::default()));

    let start = Instant::now();
    for _ in 0..20 {
        let status = send(&mut svc, "https://api.example.com/429").await.unwrap();
        assert_eq!(status, 429);
    }
    assert_eq!(start.elapsed(), Duration::ZERO);

    let bucket = limiter.limiter().bucket("https://api.example.com").await.unwrap();
    assert_eq!(bucket.count().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fill_takes_exactly_the_remaining_room() {
    let limiter = RequestLimiter::new(LimiterConfig::per_second(1000.0).with_per_minute(1500.0)).unwrap();
    for _ in 0..3 {
        limiter.acquire("api").await.unwrap();
    }

    limiter.fill("api", "https://api.example.com/").await.unwrap();

    let bucket = limiter.limiter().bucket("api").await.unwrap();
    assert_eq!(bucket.count().await.unwrap(), 1000);
    assert!(!limiter.limiter().try_acquire("api", 1).await.unwrap());
}

mod session {
    use super::*;

    use reqwest::Client;
    use uuid::Uuid;

    fn no_wait(config: LimiterConfig) -> LimiterConfig {
        config.with_max_delay(Duration::ZERO)
    }

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tower-drip-{}.db", Uuid::new_v4()))
    }

    async fn server() -> mockito::ServerGuard {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/text")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;
        server
            .mock("GET", "/limited")
            .with_status(429)
            .create_async()
            .await;
        server
            .mock("GET", "/error")
            .with_status(500)
            .create_async()
            .await;
        server
    }

    fn is_limited(result: Result<reqwest::Response, DripError>) -> bool {
        matches!(result, Err(ref err) if err.is_delay_exceeded())
    }

    #[tokio::test]
    async fn it_limits_a_session() {
        let server = server().await;
        let session = LimiterSession::new(no_wait(LimiterConfig::per_second(5.0))).unwrap();
        let url = format!("{}/text", server.url());

        for _ in 0..5 {
            let response = session.send(session.get(&url)).await.unwrap();
            assert_eq!(response.status(), 200);
        }
        assert!(is_limited(session.send(session.get(&url)).await));
    }

    #[tokio::test]
    async fn it_fills_the_bucket_on_429() {
        let server = server().await;
        let session = LimiterSession::new(no_wait(LimiterConfig::per_second(5.0))).unwrap();

        let response = session
            .send(session.get(format!("{}/limited", server.url())))
            .await
            .unwrap();
        assert_eq!(response.status(), 429);

        let next = session.send(session.get(format!("{}/text", server.url()))).await;
        assert!(is_limited(next));
    }

    #[tokio::test]
    async fn it_fills_only_the_host_that_answered_429() {
        let limited = server().await;
        let other = server().await;
        let session = LimiterSession::new(no_wait(LimiterConfig::per_second(5.0))).unwrap();

        session
            .send(session.get(format!("{}/limited", limited.url())))
            .await
            .unwrap();
        for _ in 0..5 {
            session
                .send(session.get(format!("{}/text", other.url())))
                .await
                .unwrap();
        }
        assert!(is_limited(
            session.send(session.get(format!("{}/text", limited.url()))).await
        ));
    }

    #[tokio::test]
    async fn it_fills_on_custom_statuses_only() {
        let server = server().await;
        let config = no_wait(LimiterConfig::per_second(5.0)).with_limit_statuses([500]);
        let session = LimiterSession::new(config).unwrap();

        let response = session
            .send(session.get(format!("{}/limited", server.url())))
            .await
            .unwrap();
        assert_eq!(response.status(), 429);
        session
            .send(session.get(format!("{}/text", server.url())))
            .await
            .unwrap();

        let response = session
            .send(session.get(format!("{}/error", server.url())))
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
        assert!(is_limited(
            session.send(session.get(format!("{}/text", server.url()))).await
        ));
    }

    #[tokio::test]
    async fn it_never_fills_without_limit_statuses() {
        let server = server().await;
        let config = no_wait(LimiterConfig::per_second(5.0)).with_limit_statuses([]);
        let session = LimiterSession::new(config).unwrap();

        for _ in 0..5 {
            let response = session
                .send(session.get(format!("{}/limited", server.url())))
                .await
                .unwrap();
            assert_eq!(response.status(), 429);
        }
    }

    #[tokio::test]
    async fn it_uses_a_custom_limiter() {
        let server = server().await;
        let bucket = InMemoryBucket::new(vec![Rate::new(2, SECOND)]).unwrap();
        let session = LimiterSession::with_limiter(
            Limiter::from_bucket(bucket),
            no_wait(LimiterConfig::per_second(100.0)),
        );
        assert!(session.limiter().is_custom());

        let url = format!("{}/text", server.url());
        session.send(session.get(&url)).await.unwrap();
        session.send(session.get(&url)).await.unwrap();
        assert!(is_limited(session.send(session.get(&url)).await));
    }

    #[tokio::test]
    async fn it_shares_a_limiter_between_clones() {
        let server = server().await;
        let session = LimiterSession::new(no_wait(LimiterConfig::per_second(2.0))).unwrap();
        let clone = session.clone();

        let url = format!("{}/text", server.url());
        session.send(session.get(&url)).await.unwrap();
        clone.send(clone.get(&url)).await.unwrap();
        assert!(is_limited(clone.send(clone.get(&url)).await));
    }

    #[tokio::test]
    async fn it_creates_one_bucket_per_host() {
        let first = server().await;
        let second = server().await;
        let limiter = RequestLimiter::new(LimiterConfig::per_second(5.0)).unwrap();

        for server in [&first, &second, &first] {
            let url = reqwest::Url::parse(&format!("{}/text", server.url())).unwrap();
            let key = limiter.bucket_name(&url);
            limiter.acquire(&key).await.unwrap();
        }
        assert_eq!(limiter.limiter().factory().buckets().len(), 2);
    }

    struct CountingClient {
        client: Client,
        limiter: RequestLimiter,
        dispatched: AtomicUsize,
    }

    impl LimiterMixin for CountingClient {
        fn request_limiter(&self) -> &RequestLimiter {
            &self.limiter
        }

        fn dispatch(
            &self,
            request: reqwest::Request,
        ) -> impl Future<Output = reqwest::Result<reqwest::Response>> + Send {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            self.client.execute(request)
        }
    }

    #[tokio::test]
    async fn it_limits_a_custom_client() {
        let server = server().await;
        let client = CountingClient {
            client: Client::new(),
            limiter: RequestLimiter::new(no_wait(LimiterConfig::per_second(2.0))).unwrap(),
            dispatched: AtomicUsize::new(0),
        };

        let url = format!("{}/text", server.url());
        for _ in 0..2 {
            let request = client.client.get(&url).build().unwrap();
            client.execute(request).await.unwrap();
        }
        let request = client.client.get(&url).build().unwrap();
        assert!(is_limited(client.execute(request).await));
        assert_eq!(client.dispatched.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn it_limits_a_reqwest_client_service() {
        let server = server().await;
        let layer = LimiterLayer::new(no_wait(LimiterConfig::per_second(2.0))).unwrap();
        let client = Client::new();
        let mut svc = ServiceBuilder::new().layer(layer).service(client.clone());

        let url = format!("{}/text", server.url());
        for _ in 0..2 {
            let request = client.get(&url).build().unwrap();
            let response = ServiceExt::<reqwest::Request>::ready(&mut svc)
                .await
                .unwrap()
                .call(request)
                .await
                .unwrap();
            assert_eq!(response.status(), 200);
        }

        let request = client.get(&url).build().unwrap();
        let err = ServiceExt::<reqwest::Request>::ready(&mut svc)
            .await
            .unwrap()
            .call(request)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<DripError>().unwrap().is_delay_exceeded());
    }

    #[tokio::test]
    async fn it_returns_transport_errors() {
        let session = LimiterSession::new(LimiterConfig::per_second(5.0)).unwrap();
        // Port 9 (discard) is not expected to be listening.
        let result = session.send(session.get("http://127.0.0.1:9/")).await;
        assert!(matches!(result, Err(DripError::Http(_))));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn it_shares_a_sqlite_bucket_between_sessions() {
        let server = server().await;
        let path = temp_db();
        let config = no_wait(LimiterConfig::per_second(5.0))
            .with_bucket_name("shared")
            .with_backend(Backend::Sqlite {
                path: path.clone(),
                table: None,
            });
        let first = LimiterSession::new(config.clone()).unwrap();
        let second = LimiterSession::new(config).unwrap();

        let url = format!("{}/text", server.url());
        for _ in 0..5 {
            first.send(first.get(&url)).await.unwrap();
        }
        assert!(is_limited(second.send(second.get(&url)).await));

        let _ = std::fs::remove_file(path);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn it_keeps_named_sqlite_buckets_apart() {
        let server = server().await;
        let path = temp_db();
        let config = |name: &str| {
            no_wait(LimiterConfig::per_second(5.0))
                .with_bucket_name(name)
                .with_backend(Backend::Sqlite {
                    path: path.clone(),
                    table: None,
                })
        };
        let a = LimiterSession::new(config("a")).unwrap();
        let b = LimiterSession::new(config("b")).unwrap();

        a.send(a.get(format!("{}/limited", server.url())))
            .await
            .unwrap();
        assert!(is_limited(a.send(a.get(format!("{}/text", server.url()))).await));

        for _ in 0..5 {
            b.send(b.get(format!("{}/text", server.url())))
                .await
                .unwrap();
        }

        let _ = std::fs::remove_file(path);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn it_fills_a_sqlite_bucket_in_batches() {
        let path = temp_db();
        let config = LimiterConfig::per_second(1000.0).with_backend(Backend::Sqlite {
            path: path.clone(),
            table: None,
        });
        let limiter = RequestLimiter::new(config).unwrap();
        limiter.acquire("api").await.unwrap();

        limiter.fill("api", "https://api.example.com/").await.unwrap();

        let bucket = limiter.limiter().bucket("api").await.unwrap();
        assert_eq!(bucket.count().await.unwrap(), 1000);

        let _ = std::fs::remove_file(path);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn it_keeps_unlimited_sqlite_buckets_small() {
        let path = temp_db();
        let config = LimiterConfig::new().with_backend(Backend::Sqlite {
            path: path.clone(),
            table: None,
        });
        let limiter = RequestLimiter::new(config).unwrap();
        for _ in 0..100 {
            limiter.acquire("api").await.unwrap();
        }

        let bucket = limiter.limiter().bucket("api").await.unwrap();
        assert_eq!(bucket.count().await.unwrap(), 1);

        let _ = std::fs::remove_file(path);
    }
}
