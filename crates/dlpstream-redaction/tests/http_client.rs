//! HTTP redaction client against a scripted local server

use dlpstream_core::{ClassifierFailure, DetectorSet, Error, Likelihood};
use dlpstream_redaction::{HttpRedactionClient, HttpRedactionConfig, RedactionClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve exactly one request with a canned status and body, returning the
/// request body the client sent.
async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        // Read headers, then the declared body length
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();

        String::from_utf8_lossy(&buf[header_end..]).to_string()
    });

    (format!("http://{}", addr), handle)
}

fn email_set() -> DetectorSet {
    DetectorSet::new(["EMAIL_ADDRESS"], Likelihood::Possible).unwrap()
}

#[tokio::test]
async fn test_successful_batch_sends_detectors_and_marker() {
    let (endpoint, server) = serve_once("200 OK", r#"{"items":["Contact me at REDACTED","clean"]}"#).await;
    let client = HttpRedactionClient::new(&HttpRedactionConfig::new(endpoint)).unwrap();

    let out = client
        .redact_batch(
            &["Contact me at a@b.com".to_string(), "clean".to_string()],
            &email_set(),
        )
        .await
        .unwrap();
    assert_eq!(out, vec!["Contact me at REDACTED", "clean"]);

    let sent: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
    assert_eq!(sent["detectors"][0], "EMAIL_ADDRESS");
    assert_eq!(sent["min_likelihood"], "POSSIBLE");
    assert_eq!(sent["replace_with"], "REDACTED");
    assert_eq!(sent["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_quota_exceeded_is_transient() {
    let (endpoint, server) = serve_once("429 Too Many Requests", r#"{"error":"quota"}"#).await;
    let client = HttpRedactionClient::new(&HttpRedactionConfig::new(endpoint)).unwrap();

    let err = client.redact("a@b.com", &email_set()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ClassifierTransient {
            kind: ClassifierFailure::QuotaExceeded,
            ..
        }
    ));
    assert!(err.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn test_bad_request_is_invalid_input() {
    let (endpoint, server) = serve_once("400 Bad Request", r#"{"error":"malformed"}"#).await;
    let client = HttpRedactionClient::new(&HttpRedactionConfig::new(endpoint)).unwrap();

    let err = client.redact("a@b.com", &email_set()).await.unwrap_err();
    assert!(matches!(err, Error::ClassifierInvalidInput(_)));
    assert!(!err.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn test_cardinality_mismatch_rejected() {
    let (endpoint, server) = serve_once("200 OK", r#"{"items":[]}"#).await;
    let client = HttpRedactionClient::new(&HttpRedactionConfig::new(endpoint)).unwrap();

    let err = client.redact("a@b.com", &email_set()).await.unwrap_err();
    assert!(matches!(err, Error::ClassifierInvalidInput(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_service_is_unavailable() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client =
        HttpRedactionClient::new(&HttpRedactionConfig::new(format!("http://{}", addr))).unwrap();
    let err = client.redact("a@b.com", &email_set()).await.unwrap_err();
    assert!(matches!(err, Error::ClassifierTransient { .. }));
}
