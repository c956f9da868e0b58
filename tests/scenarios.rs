//! Integration tests exercising the transfer state machine against a
//! mock HTTP server: basic GET, accepted/ignored resume, checksum
//! verification, cancellation, and bounded-concurrency batch dispatch.

use fetchkit::{Client, Destination, HashAlgorithm, Hasher, Request};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn dispatch(client: &Client, request: Request) -> std::sync::Arc<fetchkit::Response> {
    let response = client.do_request(request);
    response.wait().await;
    response
}

#[tokio::test]
async fn basic_get_resolves_filename_and_downloads_full_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a/b/c.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"hello world".to_vec())
                .insert_header("Content-Length", "11"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = Client::new().unwrap();
    let request = Request::new(
        Destination::path(dir.path()),
        format!("{}/a/b/c.txt", server.uri()),
    )
    .unwrap();

    let response = dispatch(&client, request).await;

    assert!(response.err().is_none(), "unexpected error: {:?}", response.err());
    assert_eq!(response.filename(), Some("c.txt".to_string()));
    assert_eq!(response.size_total(), 11);
    assert_eq!(response.bytes_complete(), 11);
    assert!(!response.did_resume());

    let contents = std::fs::read(dir.path().join("c.txt")).unwrap();
    assert_eq!(contents, b"hello world");
}

#[tokio::test]
async fn resume_accepted_extends_partial_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/c.txt"))
        .and(header("Range", "bytes=6-"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(b"world".to_vec())
                .insert_header("Content-Range", "bytes 6-10/11"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("c.txt");
    std::fs::write(&file_path, b"hello ").unwrap();

    let client = Client::new().unwrap();
    let request = Request::new(Destination::path(&file_path), format!("{}/c.txt", server.uri()))
        .unwrap()
        .with_size(11);

    let response = dispatch(&client, request).await;

    assert!(response.err().is_none(), "unexpected error: {:?}", response.err());
    assert!(response.did_resume());
    assert_eq!(response.bytes_resumed(), 6);
    assert_eq!(response.bytes_complete(), 5);

    let contents = std::fs::read(&file_path).unwrap();
    assert_eq!(contents, b"hello world");
}

#[tokio::test]
async fn server_ignoring_range_restarts_from_scratch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/c.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"hello world".to_vec())
                .insert_header("Content-Length", "11"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("c.txt");
    std::fs::write(&file_path, b"hello ").unwrap();

    let client = Client::new().unwrap();
    let request = Request::new(Destination::path(&file_path), format!("{}/c.txt", server.uri())).unwrap();

    let response = dispatch(&client, request).await;

    assert!(response.err().is_none(), "unexpected error: {:?}", response.err());
    assert!(!response.did_resume());
    assert_eq!(response.bytes_complete(), 11);

    let contents = std::fs::read(&file_path).unwrap();
    assert_eq!(contents, b"hello world");
}

#[tokio::test]
async fn checksum_mismatch_deletes_file_when_requested() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/c.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"hello world".to_vec())
                .insert_header("Content-Length", "11"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("c.txt");

    let wrong_digest = {
        let mut hasher = HashAlgorithm::Sha256.hasher();
        hasher.update(b"not the actual body");
        hasher.finalize()
    };

    let client = Client::new().unwrap();
    let request = Request::new(Destination::path(&file_path), format!("{}/c.txt", server.uri()))
        .unwrap()
        .with_hash(HashAlgorithm::Sha256)
        .with_checksum(wrong_digest)
        .delete_on_error();

    let response = dispatch(&client, request).await;

    assert!(matches!(
        response.err().as_deref(),
        Some(fetchkit::DownloadError::ChecksumMismatch { .. })
    ));
    assert!(!file_path.exists());
}

#[tokio::test]
async fn checksum_match_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/c.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"hello world".to_vec())
                .insert_header("Content-Length", "11"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("c.txt");

    let correct_digest = {
        let mut hasher = HashAlgorithm::Sha256.hasher();
        hasher.update(b"hello world");
        hasher.finalize()
    };

    let client = Client::new().unwrap();
    let request = Request::new(Destination::path(&file_path), format!("{}/c.txt", server.uri()))
        .unwrap()
        .with_hash(HashAlgorithm::Sha256)
        .with_checksum(correct_digest);

    let response = dispatch(&client, request).await;

    assert!(response.err().is_none(), "unexpected error: {:?}", response.err());
    assert!(file_path.exists());
}

#[tokio::test]
async fn cancellation_before_response_reports_canceled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 1024])
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = Client::new().unwrap();
    let request = Request::new(Destination::path(dir.path()), format!("{}/slow.bin", server.uri())).unwrap();
    let cancel_token = request.cancel_token();

    let response = client.do_request(request);
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel_token.cancel();
    response.wait().await;

    assert!(matches!(
        response.err().as_deref(),
        Some(fetchkit::DownloadError::Canceled)
    ));
}

#[tokio::test]
async fn batch_dispatches_all_requests_with_bounded_workers() {
    let server = MockServer::start().await;
    for i in 0..5 {
        Mock::given(method("GET"))
            .and(path(format!("/file-{i}.bin")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let client = Client::new().unwrap();
    let requests: Vec<Request> = (0..5)
        .map(|i| {
            Request::new(
                Destination::path(dir.path()),
                format!("{}/file-{i}.bin", server.uri()),
            )
            .unwrap()
        })
        .collect();

    use futures::StreamExt;
    let mut stream = Box::pin(client.do_batch(2, requests));
    let mut seen = 0;
    while let Some(response) = stream.next().await {
        assert!(response.err().is_none(), "unexpected error: {:?}", response.err());
        seen += 1;
    }
    assert_eq!(seen, 5);
}
