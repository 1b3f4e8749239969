//! Timing and classification tests for the retrying sub-request client.

use std::time::{Duration, Instant};

use httpmock::Method::GET;
use httpmock::MockServer;
use rangefetch::{FetchError, RequestClient, RetryClient};
use reqwest::{Method, Request, Url};

fn get_request(url: &str) -> Request {
    Request::new(Method::GET, Url::parse(url).unwrap())
}

#[tokio::test]
async fn successful_request_is_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/ok");
            then.status(200).body("Woooo");
        })
        .await;

    let client =
        RetryClient::new(3, Duration::from_millis(10), Duration::from_millis(250)).unwrap();
    let response = client.execute(get_request(&server.url("/ok"))).await.unwrap();

    assert_eq!(response.status().as_u16(), 200);
    mock.assert_async().await;
}

#[tokio::test]
async fn timeouts_retry_with_constant_backoff_then_fail() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_secs(1)).body("late");
        })
        .await;

    // retries=3, every=10ms, per-attempt timeout=10ms: four attempts of at
    // most 10ms each plus three 10ms gaps, roughly 70ms before scheduler
    // slack.
    let client =
        RetryClient::new(3, Duration::from_millis(10), Duration::from_millis(10)).unwrap();

    let start = Instant::now();
    let err = client
        .execute(get_request(&server.url("/slow")))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, FetchError::Network(_)), "got {err:?}");
    assert!(
        elapsed < Duration::from_millis(500),
        "retries took too long: {elapsed:?}"
    );
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/forbidden");
            then.status(403);
        })
        .await;

    let client =
        RetryClient::new(3, Duration::from_millis(10), Duration::from_millis(250)).unwrap();
    let err = client
        .execute(get_request(&server.url("/forbidden")))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::NonRetriableStatus { status: 403 }));
    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn server_errors_are_retried_then_surfaced() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/broken");
            then.status(500);
        })
        .await;

    let client =
        RetryClient::new(3, Duration::from_millis(10), Duration::from_millis(250)).unwrap();
    let err = client
        .execute(get_request(&server.url("/broken")))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Http { status: 500, .. }));
    // Initial attempt plus three retries.
    mock.assert_hits_async(4).await;
}

#[tokio::test]
async fn exponential_backoff_stays_under_its_envelope() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_secs(1)).body("late");
        })
        .await;

    // Four 10ms attempts plus 10+20+40ms of delays, about 110ms; the loose
    // envelope is 10^retries = 1000ms.
    let client = RetryClient::with_exponential_backoff(
        3,
        Duration::from_millis(10),
        Duration::from_millis(10),
    )
    .unwrap();

    let start = Instant::now();
    let err = client
        .execute(get_request(&server.url("/slow")))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, FetchError::Network(_)), "got {err:?}");
    assert!(
        elapsed < Duration::from_millis(1000),
        "exponential retries took too long: {elapsed:?}"
    );
}
