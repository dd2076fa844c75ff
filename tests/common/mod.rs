#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use object_upload_backend::config::UploadConfig;
use object_upload_backend::models::TenancyContext;
use object_upload_backend::services::error::UploadError;
use object_upload_backend::services::fetcher::RemoteFetcher;
use object_upload_backend::services::keys::ObjectKey;
use object_upload_backend::services::orchestrator::{
    OrchestratorConfig, RetryPolicy, UploadOrchestrator,
};
use object_upload_backend::services::storage::StorageClient;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Storage double with per-key failure injection and concurrency tracking
#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    permanent: Mutex<HashSet<String>>,
    transient: Mutex<HashMap<String, u32>>,
    puts: AtomicUsize,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
    put_delay: Duration,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_put_delay(delay: Duration) -> Self {
        Self {
            put_delay: delay,
            ..Self::default()
        }
    }

    /// Every put whose key ends with `suffix` is rejected permanently
    pub async fn fail_permanently(&self, suffix: &str) {
        self.permanent.lock().await.insert(suffix.to_string());
    }

    /// The first `times` puts whose key ends with `suffix` fail transiently
    pub async fn fail_transiently(&self, suffix: &str, times: u32) {
        self.transient.lock().await.insert(suffix.to_string(), times);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn object(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn put(
        &self,
        key: &ObjectKey,
        body: Bytes,
        content_type: &str,
    ) -> Result<u64, UploadError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);

        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }

        let result = self.store(key, body, content_type).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn presign(&self, key: &ObjectKey, expires_in: Duration) -> Result<String, UploadError> {
        Ok(format!(
            "https://fake.local/{}?expires={}",
            key,
            expires_in.as_secs()
        ))
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        format!("https://fake.local/{}", key)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

impl FakeStorage {
    async fn store(
        &self,
        key: &ObjectKey,
        body: Bytes,
        content_type: &str,
    ) -> Result<u64, UploadError> {
        let key_str = key.as_str();
        if self
            .permanent
            .lock()
            .await
            .iter()
            .any(|suffix| key_str.ends_with(suffix.as_str()))
        {
            return Err(UploadError::StoragePermanent(format!(
                "AccessDenied: {}",
                key_str
            )));
        }

        {
            let mut transient = self.transient.lock().await;
            if let Some(remaining) = transient
                .iter_mut()
                .find(|(suffix, _)| key_str.ends_with(suffix.as_str()))
                .map(|(_, remaining)| remaining)
            {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(UploadError::StorageTransient(format!(
                        "SlowDown: {}",
                        key_str
                    )));
                }
            }
        }

        let size = body.len() as u64;
        self.objects
            .lock()
            .await
            .insert(key_str.to_string(), (body, content_type.to_string()));
        Ok(size)
    }
}

pub fn tenancy() -> TenancyContext {
    TenancyContext::new("acme", "user-1", "photos").unwrap()
}

/// Small limits and near-zero backoff so retry tests finish quickly
pub fn test_config() -> UploadConfig {
    UploadConfig {
        concurrency_limit: 2,
        max_attempts: 3,
        backoff_base_ms: 1,
        max_object_size: 1024 * 1024,
        max_archive_size: 4 * 1024 * 1024,
        max_archive_entries: 100,
        max_batch_items: 50,
        fetch_connect_timeout_secs: 2,
        fetch_timeout_secs: Some(2),
        presign_default_validity_secs: 600,
        presign_max_validity_secs: 3600,
        request_timeout_secs: 30,
    }
}

pub fn orchestrator(storage: Arc<FakeStorage>, concurrency_limit: usize) -> UploadOrchestrator {
    let fetcher = RemoteFetcher::from_config(&test_config()).unwrap();
    orchestrator_with_fetcher(storage, concurrency_limit, fetcher)
}

pub fn orchestrator_with_fetcher(
    storage: Arc<FakeStorage>,
    concurrency_limit: usize,
    fetcher: RemoteFetcher,
) -> UploadOrchestrator {
    let config = test_config();
    UploadOrchestrator::new(
        storage,
        fetcher,
        OrchestratorConfig {
            concurrency_limit,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            max_object_size: config.max_object_size,
        },
    )
}

/// Builds a ZIP in memory. Names ending in '/' become directory entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        if let Some(dir) = name.strip_suffix('/') {
            writer.add_directory(dir, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Rewrites the central directory of a ZIP in reverse record order. Local
/// headers stay where they are, so index order and physical order disagree.
pub fn reverse_central_directory(mut data: Vec<u8>) -> Vec<u8> {
    let eocd = data.len() - 22;
    assert_eq!(&data[eocd..eocd + 4], b"PK\x05\x06", "archive must not carry a comment");
    let count = u16::from_le_bytes([data[eocd + 10], data[eocd + 11]]) as usize;
    let cd_size = u32::from_le_bytes(data[eocd + 12..eocd + 16].try_into().unwrap()) as usize;
    let cd_start = u32::from_le_bytes(data[eocd + 16..eocd + 20].try_into().unwrap()) as usize;

    let mut records = Vec::with_capacity(count);
    let mut pos = cd_start;
    for _ in 0..count {
        assert_eq!(&data[pos..pos + 4], b"PK\x01\x02");
        let field = |at: usize| u16::from_le_bytes([data[pos + at], data[pos + at + 1]]) as usize;
        let len = 46 + field(28) + field(30) + field(32);
        records.push(data[pos..pos + len].to_vec());
        pos += len;
    }
    assert_eq!(pos - cd_start, cd_size);

    let reversed: Vec<u8> = records.into_iter().rev().flatten().collect();
    data[cd_start..cd_start + cd_size].copy_from_slice(&reversed);
    data
}

/// Request counters of the local HTTP origin, one per route
#[derive(Default)]
pub struct OriginHits {
    pub flaky: AtomicUsize,
    pub missing: AtomicUsize,
    pub slow: AtomicUsize,
    pub big: AtomicUsize,
    pub bundle: AtomicUsize,
}

pub const BIG_BODY_LEN: usize = 2 * 1024 * 1024;

/// Local origin for remote-URL uploads:
/// - `/files/report.pdf`: small PDF
/// - `/files/flaky.txt`: 503 twice, then succeeds
/// - `/files/missing.txt`: 404
/// - `/files/slow.txt`: answers after 2s
/// - `/files/big.bin`: `BIG_BODY_LEN` bytes with a Content-Length
/// - `/archives/bundle.zip`: two-entry ZIP
/// - `/archives/broken.zip`: not a ZIP at all
pub async fn spawn_origin() -> (SocketAddr, Arc<OriginHits>) {
    let hits = Arc::new(OriginHits::default());
    let app = Router::new()
        .route(
            "/files/report.pdf",
            get(|| async { ([(header::CONTENT_TYPE, "application/pdf")], "%PDF-1.4 remote") }),
        )
        .route(
            "/files/flaky.txt",
            get(|State(hits): State<Arc<OriginHits>>| async move {
                if hits.flaky.fetch_add(1, Ordering::SeqCst) < 2 {
                    StatusCode::SERVICE_UNAVAILABLE.into_response()
                } else {
                    "recovered".into_response()
                }
            }),
        )
        .route(
            "/files/missing.txt",
            get(|State(hits): State<Arc<OriginHits>>| async move {
                hits.missing.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }),
        )
        .route(
            "/files/slow.txt",
            get(|State(hits): State<Arc<OriginHits>>| async move {
                hits.slow.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        )
        .route(
            "/files/big.bin",
            get(|State(hits): State<Arc<OriginHits>>| async move {
                hits.big.fetch_add(1, Ordering::SeqCst);
                vec![0u8; BIG_BODY_LEN]
            }),
        )
        .route(
            "/archives/bundle.zip",
            get(|State(hits): State<Arc<OriginHits>>| async move {
                hits.bundle.fetch_add(1, Ordering::SeqCst);
                let archive = zip_bytes(&[
                    ("manual.txt", &b"read me"[..]),
                    ("scans/page1.pdf", &b"%PDF-1.4 page"[..]),
                ]);
                zip_response(archive)
            }),
        )
        .route(
            "/archives/broken.zip",
            get(|| async { zip_response(b"definitely not a zip".to_vec()) }),
        )
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

fn zip_response(body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/zip")], body).into_response()
}
