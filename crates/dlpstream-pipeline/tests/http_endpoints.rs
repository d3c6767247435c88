//! HTTP log store and HTTP sink against a scripted local server

use dlpstream_core::{Error, RedactedItem, Sequence};
use dlpstream_pipeline::sink::HttpSink;
use dlpstream_pipeline::{HttpLogStore, LogEntry, LogStore, Sink, SinkRecord};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Request line and body of the single request a scripted server received
struct Received {
    request_line: String,
    body: String,
}

/// Serve exactly one request with a canned status and body
async fn serve_once(
    status: &'static str,
    body: &'static str,
) -> (String, tokio::task::JoinHandle<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = headers
            .to_lowercase()
            .lines()
            .find_map(|l| l.strip_prefix("content-length:").map(|v| v.trim().to_string()))
            .and_then(|v| v.parse::<usize>().ok())
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

        Received {
            request_line: headers.lines().next().unwrap_or_default().to_string(),
            body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
        }
    });

    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn test_log_store_lists_entries_and_skips_malformed_ones() {
    let (base, server) = serve_once(
        "200 OK",
        r#"{"entries":[
            {"position": 2, "payload": {"text": "hello"}},
            {"position": 3},
            {"position": 4, "payload": {"structured": {"user": "a@b.com"}}}
        ]}"#,
    )
    .await;
    let store = HttpLogStore::new(&base, Duration::from_secs(5)).unwrap();

    let entries = store.list_entries("app", 1).await.unwrap();
    let received = server.await.unwrap();

    assert_eq!(received.request_line, "GET /v1/logs/app/entries?after=1 HTTP/1.1");
    assert_eq!(
        entries,
        vec![
            LogEntry::text(2, "hello"),
            LogEntry::structured(4, json!({"user": "a@b.com"}))
        ]
    );
}

#[tokio::test]
async fn test_log_store_error_status_is_source_unavailable() {
    let (base, _server) = serve_once("503 Service Unavailable", "{}").await;
    let store = HttpLogStore::new(&base, Duration::from_secs(5)).unwrap();

    let err = store.list_entries("app", 0).await.unwrap_err();
    assert!(matches!(err, Error::SourceUnavailable { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_http_sink_posts_record_json() {
    let (base, server) = serve_once("202 Accepted", "").await;
    let sink = HttpSink::new("collector", format!("{}/dlpstream", base), 5_000).unwrap();
    let record = SinkRecord::new(RedactedItem {
        source_id: "app.log".to_string(),
        sequence: Sequence::new(1, 42),
        text: "Contact me at REDACTED".to_string(),
    });

    sink.write(&record).await.unwrap();
    let received = server.await.unwrap();

    assert_eq!(received.request_line, "POST /dlpstream HTTP/1.1");
    let body: serde_json::Value = serde_json::from_str(&received.body).unwrap();
    assert_eq!(body["source_id"], "app.log");
    assert_eq!(body["sequence"], json!({"epoch": 1, "position": 42}));
    assert_eq!(body["message"], "Contact me at REDACTED");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_http_sink_rejection_is_sink_unavailable() {
    let (base, _server) = serve_once("500 Internal Server Error", "").await;
    let sink = HttpSink::new("collector", base, 5_000).unwrap();
    let record = SinkRecord::new(RedactedItem {
        source_id: "app.log".to_string(),
        sequence: Sequence::at(1),
        text: "x".to_string(),
    });

    let err = sink.write(&record).await.unwrap_err();
    assert!(matches!(err, Error::SinkUnavailable { .. }));
}
