//! Integration tests against a real HTTP server.
//!
//! These run the default reqwest-backed transport end to end with wiremock.

#![allow(clippy::unwrap_used)]

mod support;

use std::io::Write;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::StreamExt;
use streamget_core::{DecoderRegistry, DownloadError, DownloadEvent, Options};
use support::socket_guard::start_mock_server_or_skip;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

fn fast_options() -> Options {
    Options::default().with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

#[tokio::test]
async fn test_download_follows_redirect_chain() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("location", "/middle"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/middle"))
        .respond_with(
            ResponseTemplate::new(307)
                .insert_header("location", format!("{}/final", mock_server.uri()).as_str()),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/final"))
        .respond_with(ResponseTemplate::new(200).set_body_string("arrived"))
        .mount(&mock_server)
        .await;

    let mut stream = streamget_core::start(&format!("{}/start", mock_server.uri()), fast_options());
    let mut redirects = Vec::new();
    let mut body = Vec::new();
    while let Some(event) = stream.next().await {
        match event {
            DownloadEvent::Redirect { to, status, .. } => redirects.push((status, to)),
            DownloadEvent::Data(chunk) => body.extend_from_slice(&chunk),
            DownloadEvent::Error(error) => panic!("download failed: {error}"),
            _ => {}
        }
    }

    assert_eq!(body, b"arrived");
    assert_eq!(redirects.len(), 2);
    assert_eq!(redirects[0].0, 302);
    assert_eq!(redirects[0].1, format!("{}/middle", mock_server.uri()));
    assert_eq!(redirects[1].1, format!("{}/final", mock_server.uri()));
}

#[tokio::test]
async fn test_download_redirect_loop_fails() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/loop"))
        .mount(&mock_server)
        .await;

    let result = streamget_core::start(
        &format!("{}/loop", mock_server.uri()),
        fast_options().with_max_redirects(3),
    )
    .collect_bytes()
    .await;

    assert!(matches!(
        result,
        Err(DownloadError::TooManyRedirects { max: 3, .. })
    ));
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
}

#[tokio::test]
async fn test_download_retries_server_error_then_succeeds() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("third time lucky"))
        .mount(&mock_server)
        .await;

    let text = streamget_core::start(&format!("{}/flaky", mock_server.uri()), fast_options())
        .collect_text()
        .await
        .unwrap();

    assert_eq!(text, "third time lucky");
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_download_rate_limited_honours_retry_after() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let started = std::time::Instant::now();
    let mut stream =
        streamget_core::start(&format!("{}/limited", mock_server.uri()), fast_options());
    let mut rate_limited = 0;
    let mut completed = false;
    while let Some(event) = stream.next().await {
        match event {
            DownloadEvent::RateLimited { status, delay, .. } => {
                assert_eq!(status, 429);
                assert_eq!(delay, Duration::from_secs(1));
                rate_limited += 1;
            }
            DownloadEvent::Completed { .. } => completed = true,
            _ => {}
        }
    }

    assert!(completed);
    assert_eq!(rate_limited, 1);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_download_not_found_is_not_retried() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let result = streamget_core::start(
        &format!("{}/missing", mock_server.uri()),
        fast_options().with_max_retries(5),
    )
    .collect_bytes()
    .await;

    match result {
        Err(error) => assert_eq!(error.status(), Some(404)),
        Ok(bytes) => panic!("expected 404 error, got {} bytes", bytes.len()),
    }
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_download_decodes_gzip_body() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    let text = "compressible line\n".repeat(200);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    Mock::given(method("GET"))
        .and(path("/gz"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(compressed.clone()),
        )
        .mount(&mock_server)
        .await;

    let url = format!("{}/gz", mock_server.uri());
    let decoded = streamget_core::start(
        &url,
        fast_options().with_accept_encoding(DecoderRegistry::standard()),
    )
    .collect_text()
    .await
    .unwrap();
    assert_eq!(decoded, text);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(
        requests[0].headers.get("accept-encoding").unwrap().to_str().unwrap(),
        "deflate, gzip, x-gzip"
    );

    let raw = streamget_core::start(
        &url,
        fast_options().with_header("accept-encoding", "gzip"),
    )
    .collect_bytes()
    .await
    .unwrap();
    assert_eq!(raw.as_ref(), compressed.as_slice());
}

#[tokio::test]
async fn test_download_forwards_caller_range() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/partial"))
        .and(header("range", "bytes=4-7"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 4-7/10")
                .set_body_string("4567"),
        )
        .mount(&mock_server)
        .await;

    let text = streamget_core::start(
        &format!("{}/partial", mock_server.uri()),
        fast_options().with_header("range", "bytes=4-7"),
    )
    .collect_text()
    .await
    .unwrap();
    assert_eq!(text, "4567");
}

#[tokio::test]
async fn test_download_head_reports_length_without_body() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("HEAD"))
        .and(path("/meta"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let mut stream = streamget_core::start(
        &format!("{}/meta", mock_server.uri()),
        fast_options().with_method(reqwest::Method::HEAD),
    );
    let mut saw_data = false;
    let mut last = None;
    while let Some(event) = stream.next().await {
        saw_data |= matches!(event, DownloadEvent::Data(_));
        last = Some(event);
    }

    assert!(!saw_data);
    assert!(matches!(
        last,
        Some(DownloadEvent::Completed {
            bytes_downloaded: 0
        })
    ));
}

#[tokio::test]
async fn test_download_connection_refused_exhausts_retries() {
    let mut stream = streamget_core::start("http://127.0.0.1:1/nothing", fast_options());
    let mut retries = 0;
    let mut error = None;
    while let Some(event) = stream.next().await {
        match event {
            DownloadEvent::Retry { .. } => retries += 1,
            DownloadEvent::Error(e) => error = Some(e),
            _ => {}
        }
    }

    assert_eq!(retries, 2);
    let error = error.unwrap();
    assert!(error.transport_kind().is_some(), "got: {error:?}");
}
