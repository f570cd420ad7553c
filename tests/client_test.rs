//! End-to-end scenarios against a mocked ingestion endpoint.

use std::time::Duration;

use httpbeacon::{Client, Event};

#[tokio::test]
async fn happy_path_delivers_tracked_event() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/events")
        .match_header("x-api-key", "test-key")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder()
        .endpoint(format!("{}/v1/events", server.url()))
        .api_key("test-key")
        .storage_dir(dir.path().to_path_buf())
        .flush_interval(Duration::from_millis(50))
        .build()
        .await
        .unwrap();

    client.track(Event::new("get", "/widgets", 200).with_response_time_ms(4.2));
    tokio::time::sleep(Duration::from_millis(200)).await;

    mock.assert_async().await;
    client.shutdown().await;
}

#[tokio::test]
async fn oversized_method_and_path_are_sanitized_before_send() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/events")
        .with_status(202)
        .match_body(mockito::Matcher::Regex(r#""method":"GET""#.to_string()))
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder()
        .endpoint(format!("{}/v1/events", server.url()))
        .api_key("test-key")
        .storage_dir(dir.path().to_path_buf())
        .flush_interval(Duration::from_millis(50))
        .build()
        .await
        .unwrap();

    client.track(Event::new("get", "/widgets", 200));
    tokio::time::sleep(Duration::from_millis(200)).await;

    mock.assert_async().await;
    client.shutdown().await;
}

#[tokio::test]
async fn retryable_failures_eventually_spill_to_disk() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/events")
        .with_status(503)
        .expect_at_least(5)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder()
        .endpoint(format!("{}/v1/events", server.url()))
        .api_key("test-key")
        .storage_dir(dir.path().to_path_buf())
        .flush_interval(Duration::from_millis(10))
        .build()
        .await
        .unwrap();

    for i in 0..5 {
        client.track(Event::new("GET", format!("/{i}"), 200));
        client.flush().await;
    }

    client.shutdown().await;
}

#[tokio::test]
async fn non_retryable_failure_does_not_retry_the_same_batch() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/events")
        .with_status(400)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder()
        .endpoint(format!("{}/v1/events", server.url()))
        .api_key("test-key")
        .storage_dir(dir.path().to_path_buf())
        .flush_interval(Duration::from_millis(3_600_000))
        .build()
        .await
        .unwrap();

    client.track(Event::new("GET", "/widgets", 200));
    client.flush().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    mock.assert_async().await;
    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_flushes_remaining_events() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/events")
        .with_status(202)
        .expect_at_least(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder()
        .endpoint(format!("{}/v1/events", server.url()))
        .api_key("test-key")
        .storage_dir(dir.path().to_path_buf())
        .flush_interval(Duration::from_secs(3600))
        .build()
        .await
        .unwrap();

    client.track(Event::new("GET", "/widgets", 200));
    client.shutdown().await;
    client.shutdown().await;

    mock.assert_async().await;
}

#[tokio::test]
async fn rejects_private_endpoint_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let result = Client::builder()
        .endpoint("https://192.168.1.10/v1/events")
        .api_key("test-key")
        .storage_dir(dir.path().to_path_buf())
        .build()
        .await;

    assert!(result.is_err());
}
