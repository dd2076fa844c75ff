use axum::{
    Router,
    body::Body,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use object_upload_backend::services::error::UploadError;
use object_upload_backend::services::fetcher::RemoteFetcher;
use std::net::SocketAddr;
use std::time::Duration;

async fn spawn_origin() -> SocketAddr {
    let app = Router::new()
        .route(
            "/files/report.pdf",
            get(|| async { ([(header::CONTENT_TYPE, "application/pdf")], "%PDF-1.4 tiny") }),
        )
        .route(
            "/big",
            get(|| async { vec![0u8; 8 * 1024] }),
        )
        .route(
            "/chunked",
            get(|| async {
                // No Content-Length: the size is only known while streaming
                let chunks = (0..8).map(|_| Ok::<_, std::io::Error>(Bytes::from(vec![1u8; 512])));
                Body::from_stream(futures::stream::iter(chunks))
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .route(
            "/unavailable",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE.into_response() }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn fetcher(max_bytes: u64) -> RemoteFetcher {
    RemoteFetcher::new(
        Duration::from_secs(2),
        Some(Duration::from_millis(500)),
        max_bytes,
    )
    .unwrap()
}

#[tokio::test]
async fn test_fetch_success() {
    let addr = spawn_origin().await;
    let url = RemoteFetcher::parse_url(&format!("http://{}/files/report.pdf", addr)).unwrap();

    let body = fetcher(1024).fetch(&url).await.unwrap();
    assert_eq!(body.file_name, "report.pdf");
    assert_eq!(body.content_type.as_deref(), Some("application/pdf"));

    let bytes = body.bytes().await.unwrap();
    assert_eq!(&bytes[..], b"%PDF-1.4 tiny");
}

#[tokio::test]
async fn test_not_found_is_permanent() {
    let addr = spawn_origin().await;
    let url = RemoteFetcher::parse_url(&format!("http://{}/missing", addr)).unwrap();

    let err = fetcher(1024).fetch(&url).await.err().unwrap();
    assert!(matches!(err, UploadError::FetchHttpError { status: 404, .. }), "{:?}", err);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let addr = spawn_origin().await;
    let url = RemoteFetcher::parse_url(&format!("http://{}/unavailable", addr)).unwrap();

    let err = fetcher(1024).fetch(&url).await.err().unwrap();
    assert!(matches!(err, UploadError::FetchHttpError { status: 503, .. }), "{:?}", err);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_oversized_body() {
    let addr = spawn_origin().await;
    let url = RemoteFetcher::parse_url(&format!("http://{}/big", addr)).unwrap();

    let err = fetcher(1024).fetch(&url).await.err().unwrap();
    assert!(matches!(err, UploadError::FetchSizeExceeded { limit: 1024, .. }), "{:?}", err);
}

#[tokio::test]
async fn test_size_ceiling_applies_while_streaming() {
    let addr = spawn_origin().await;
    let url = RemoteFetcher::parse_url(&format!("http://{}/chunked", addr)).unwrap();

    let body = fetcher(1024).fetch(&url).await.unwrap();
    assert_eq!(body.content_length, None);
    let err = body.bytes().await.unwrap_err();
    assert!(matches!(err, UploadError::FetchSizeExceeded { limit: 1024, .. }), "{:?}", err);

    let body = fetcher(8 * 512).fetch(&url).await.unwrap();
    assert_eq!(body.bytes().await.unwrap().len(), 8 * 512);
}

#[tokio::test]
async fn test_slow_origin_times_out() {
    let addr = spawn_origin().await;
    let url = RemoteFetcher::parse_url(&format!("http://{}/slow", addr)).unwrap();

    let err = fetcher(1024).fetch(&url).await.err().unwrap();
    assert!(matches!(err, UploadError::FetchTimeout(_)), "{:?}", err);
    assert!(err.is_retryable());
}

#[test]
fn test_rejects_non_http_schemes() {
    for raw in ["ftp://example.com/a.txt", "file:///etc/passwd", "not a url"] {
        assert!(matches!(
            RemoteFetcher::parse_url(raw),
            Err(UploadError::InvalidUrl(_))
        ));
    }
}
