use crate::services::error::UploadError;
use crate::services::keys::ObjectKey;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Characters left untouched inside a key segment of a public URL
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Narrow view of the object-storage backend.
///
/// Implementations must report `StorageTransient` for failures worth retrying
/// (timeouts, 5xx, throttling, dropped connections) and `StoragePermanent`
/// for everything else. `put` overwrites an existing object with the same key.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Stores `body` under `key`, returning the stored size in bytes
    async fn put(&self, key: &ObjectKey, body: Bytes, content_type: &str)
    -> Result<u64, UploadError>;

    /// Signed GET URL valid for `expires_in`
    async fn presign(&self, key: &ObjectKey, expires_in: Duration) -> Result<String, UploadError>;

    /// Public location of an object; reachability depends on bucket policy
    fn object_url(&self, key: &ObjectKey) -> String;

    async fn health_check(&self) -> bool;
}

pub struct S3StorageClient {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3StorageClient {
    pub fn new(client: Client, bucket: String, public_base_url: String) -> Self {
        Self {
            client,
            bucket,
            public_base_url,
        }
    }
}

#[async_trait]
impl StorageClient for S3StorageClient {
    async fn put(
        &self,
        key: &ObjectKey,
        body: Bytes,
        content_type: &str,
    ) -> Result<u64, UploadError> {
        let size = body.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(content_type)
            .content_length(size as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                let err = classify_sdk_error("put_object", e);
                tracing::debug!("S3 put_object failed: key={}, error={}", key, err);
                err
            })?;
        Ok(size)
    }

    async fn presign(&self, key: &ObjectKey, expires_in: Duration) -> Result<String, UploadError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| UploadError::StoragePermanent(format!("Invalid presign validity: {}", e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .presigned(presigning_config)
            .await
            .map_err(|e| classify_sdk_error("presign get_object", e))?;

        Ok(presigned.uri().to_string())
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        public_url(&self.public_base_url, key)
    }

    async fn health_check(&self) -> bool {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok()
    }
}

/// Maps SDK failures onto the transient/permanent split
fn classify_sdk_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> UploadError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{} failed: {}", operation, DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            UploadError::StorageTransient(message)
        }
        SdkError::ServiceError(context) => {
            let status = context.raw().status().as_u16();
            let code = context.err().code().unwrap_or_default();
            if status >= 500
                || status == 429
                || matches!(code, "SlowDown" | "RequestTimeout" | "InternalError")
            {
                UploadError::StorageTransient(message)
            } else {
                UploadError::StoragePermanent(message)
            }
        }
        _ => UploadError::StoragePermanent(message),
    }
}

/// `{base}/{key}` with each key segment percent-encoded
pub fn public_url(base: &str, key: &ObjectKey) -> String {
    let encoded: Vec<String> = key
        .as_str()
        .split('/')
        .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
        .collect();
    format!("{}/{}", base.trim_end_matches('/'), encoded.join("/"))
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

/// Process-local backend for development runs and tests
pub struct MemoryStorageClient {
    objects: RwLock<HashMap<String, StoredObject>>,
    base_url: String,
}

impl MemoryStorageClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            base_url: base_url.into(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl Default for MemoryStorageClient {
    fn default() -> Self {
        Self::new("memory://objects")
    }
}

#[async_trait]
impl StorageClient for MemoryStorageClient {
    async fn put(
        &self,
        key: &ObjectKey,
        body: Bytes,
        content_type: &str,
    ) -> Result<u64, UploadError> {
        let size = body.len() as u64;
        self.objects.write().await.insert(
            key.as_str().to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(size)
    }

    async fn presign(&self, key: &ObjectKey, expires_in: Duration) -> Result<String, UploadError> {
        if !self.objects.read().await.contains_key(key.as_str()) {
            return Err(UploadError::StoragePermanent(format!(
                "No such key: {}",
                key
            )));
        }
        Ok(format!(
            "{}?X-Amz-Expires={}",
            public_url(&self.base_url, key),
            expires_in.as_secs()
        ))
    }

    fn object_url(&self, key: &ObjectKey) -> String {
        public_url(&self.base_url, key)
    }

    async fn health_check(&self) -> bool {
        true
    }
}
