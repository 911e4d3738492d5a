//! Concurrent identical calls through HttpClient share one upstream execution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier::key::inflight_url;
use courier::{
    CacheType, Error, HttpClient, RequestDescriptor, RequestOptions, Response, Transport,
    cancellation,
};
use courier_moka::MokaBackend;
use http::StatusCode;
use http::header::{AUTHORIZATION, HeaderValue};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn slow_upstream(route: &str, expected_calls: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "r-1")
                .set_body_json(json!({"items": ["a", "b"]}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(expected_calls)
        .mount(&server)
        .await;
    server
}

fn shared() -> RequestOptions {
    RequestOptions::new().memoizable(true)
}

fn client(server: &MockServer) -> HttpClient {
    HttpClient::builder()
        .base_url(server.uri())
        .build()
        .unwrap()
}

#[tokio::test]
async fn reordered_query_params_share_one_call() {
    let server = slow_upstream("/items", 1).await;
    let client = client(&server);

    let first = shared().param("b", "2").param("a", "1");
    let second = shared().param("a", "1").param("b", "2");
    let (a, b) = tokio::join!(
        client.get_raw::<Value>("/items", first),
        client.get_raw::<Value>("/items", second),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.data, b.data);
    assert_eq!(a.headers, b.headers);
    assert_eq!(b.headers["x-request-id"], "r-1");
    assert!(!a.cache_hit.memoized);
    assert!(b.cache_hit.memoized);
    assert!(b.cache_hit.inflight);
}

#[tokio::test]
async fn completed_call_is_not_shared() {
    let server = slow_upstream("/items", 2).await;
    let client = client(&server);

    let (a, b) = tokio::join!(
        client.get::<Value>("/items", shared()),
        client.get::<Value>("/items", shared()),
    );
    a.unwrap();
    b.unwrap();

    let later = client
        .get_raw::<Value>("/items", shared())
        .await
        .unwrap();
    assert!(!later.cache_hit.memoized);
}

#[tokio::test]
async fn calls_are_not_shared_by_default() {
    let server = slow_upstream("/items", 2).await;
    let client = client(&server);

    let (a, b) = tokio::join!(
        client.get::<Value>("/items", RequestOptions::new()),
        client.get::<Value>("/items", RequestOptions::new()),
    );
    a.unwrap();
    b.unwrap();
}

#[tokio::test]
async fn inflight_url_ignores_query_params() {
    let server = slow_upstream("/items", 1).await;
    let client = client(&server);
    let options = |page: &str| {
        shared().param("page", page).inflight_key(inflight_url)
    };

    let (a, b) = tokio::join!(
        client.get_raw::<Value>("/items", options("1")),
        client.get_raw::<Value>("/items", options("2")),
    );

    assert!(b.unwrap().cache_hit.memoized);
    assert!(!a.unwrap().cache_hit.memoized);
}

#[tokio::test]
async fn joiner_timeout_leaves_shared_call_running() {
    let server = slow_upstream("/items", 1).await;
    let client = client(&server);

    let (leader, joiner) = tokio::join!(
        client.get::<Value>("/items", shared()),
        client.get::<Value>("/items", shared().timeout(Duration::from_millis(50))),
    );

    assert!(matches!(joiner, Err(Error::Timeout { .. })));
    assert_eq!(leader.unwrap()["items"], json!(["a", "b"]));
}

#[tokio::test]
async fn cancelled_caller_does_not_cancel_others() {
    let server = slow_upstream("/items", 1).await;
    let client = client(&server);
    let (handle, signal) = cancellation();

    let cancelled = client.get::<Value>("/items", shared().cancel(signal));
    let waiting = client.get::<Value>("/items", shared());
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    };

    let (cancelled, waiting, ()) = tokio::join!(cancelled, waiting, cancel);

    assert!(cancelled.unwrap_err().is_cancelled());
    assert_eq!(waiting.unwrap()["items"], json!(["a", "b"]));
}

#[tokio::test]
async fn errors_reach_every_caller() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(400).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;
    let client = client(&server);

    let (a, b) = tokio::join!(
        client.get::<Value>("/broken", shared()),
        client.get::<Value>("/broken", shared()),
    );

    assert_eq!(a.unwrap_err().status(), b.unwrap_err().status());
}

#[tokio::test]
async fn different_callers_headers_are_not_mixed() {
    let server = MockServer::start().await;
    for user in ["alice", "bob"] {
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("authorization", format!("bearer {user}").as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "user": user }))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }
    let client = client(&server);
    let as_user = |user: &'static str| {
        let token = HeaderValue::from_str(&format!("bearer {user}")).unwrap();
        RequestOptions::new().header(AUTHORIZATION, token)
    };

    let (alice, bob) = tokio::join!(
        client.get::<Value>("/me", as_user("alice")),
        client.get::<Value>("/me", as_user("bob")),
    );

    assert_eq!(alice.unwrap()["user"], "alice");
    assert_eq!(bob.unwrap()["user"], "bob");
}

struct Exploding;

#[async_trait]
impl Transport for Exploding {
    async fn send(&self, _request: &RequestDescriptor) -> courier::Result<Response> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        panic!("transport exploded");
    }
}

#[tokio::test]
async fn panicking_shared_execution_fails_every_caller() {
    let client = HttpClient::builder()
        .base_url("http://upstream")
        .timeout(Duration::from_millis(200))
        .transport(Exploding)
        .build()
        .unwrap();

    let calls = async {
        tokio::join!(
            client.get::<Value>("/items", shared()),
            client.get::<Value>("/items", shared()),
        )
    };
    let (a, b) = tokio::time::timeout(Duration::from_secs(3), calls)
        .await
        .expect("callers must not hang");

    assert!(matches!(a, Err(Error::Internal(_))));
    assert!(matches!(b, Err(Error::Internal(_))));
}

#[tokio::test]
async fn revalidation_is_not_shared_with_unconditional_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(
            ResponseTemplate::new(304)
                .insert_header("cache-control", "max-age=60")
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("cache-control", "max-age=1")
                .insert_header("etag", "\"v1\"")
                .set_body_json(json!({"title": "doc"})),
        )
        .expect(2)
        .mount(&server)
        .await;
    let client = HttpClient::builder()
        .base_url(server.uri())
        .memory_cache(Arc::new(MokaBackend::builder().build()))
        .build()
        .unwrap();

    let _: Value = client.get("/doc", RequestOptions::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let revalidating = client.get_raw::<Value>("/doc", shared());
    let unconditional = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client
            .get_raw::<Value>("/doc", shared().cacheable(CacheType::Disk))
            .await
    };
    let (revalidating, unconditional) = tokio::join!(revalidating, unconditional);

    let revalidating = revalidating.unwrap();
    assert!(revalidating.cache_hit.revalidated);
    assert_eq!(revalidating.data["title"], "doc");
    let unconditional = unconditional.unwrap();
    assert_eq!(unconditional.status, StatusCode::OK);
    assert!(!unconditional.cache_hit.memoized);
    assert_eq!(unconditional.data["title"], "doc");
}
