use crate::services::error::UploadError;
use crate::services::keys::ObjectKey;
use crate::services::zip_walker::ZipEntry;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;
use utoipa::ToSchema;

pub type PayloadReader = Pin<Box<dyn AsyncRead + Send>>;

/// Where the bytes of an upload come from. Each source yields exactly one
/// body and is consumed by value, so it cannot be read twice.
pub enum ContentSource {
    LocalPayload {
        reader: PayloadReader,
        declared_len: Option<u64>,
        /// Declared by the caller; wins over inference
        content_type: Option<String>,
        /// Transport-level hint such as a multipart part header; consulted
        /// only after extension and magic-byte inference
        reported_type: Option<String>,
    },
    RemoteUrl {
        url: Url,
        content_type: Option<String>,
    },
    ZipEntry(ZipEntry),
}

impl ContentSource {
    pub fn from_bytes(data: impl Into<Bytes>, content_type: Option<String>) -> Self {
        let data: Bytes = data.into();
        let declared_len = Some(data.len() as u64);
        ContentSource::LocalPayload {
            reader: Box::pin(std::io::Cursor::new(data)),
            declared_len,
            content_type,
            reported_type: None,
        }
    }

    /// Attaches a low-priority type hint to a local payload
    pub fn with_reported_type(self, hint: Option<String>) -> Self {
        match self {
            ContentSource::LocalPayload {
                reader,
                declared_len,
                content_type,
                ..
            } => ContentSource::LocalPayload {
                reader,
                declared_len,
                content_type,
                reported_type: hint,
            },
            other => other,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ContentSource::LocalPayload { declared_len, .. } => match declared_len {
                Some(len) => format!("local payload ({} bytes)", len),
                None => "local payload".to_string(),
            },
            ContentSource::RemoteUrl { url, .. } => url.to_string(),
            ContentSource::ZipEntry(entry) => format!("zip entry {}", entry.relative_path()),
        }
    }
}

/// A source paired with its destination. Consumed by exactly one worker.
pub struct UploadItem {
    pub key: ObjectKey,
    pub source: ContentSource,
    /// Always wins over inference when set
    pub content_type: Option<String>,
}

impl UploadItem {
    pub fn new(key: ObjectKey, source: ContentSource) -> Self {
        Self {
            key,
            source,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type.filter(|ct| !ct.trim().is_empty());
        self
    }
}

/// Reads a local payload fully, failing once it grows past `limit` bytes
pub async fn read_payload(
    reader: PayloadReader,
    declared_len: Option<u64>,
    limit: u64,
) -> Result<Bytes, UploadError> {
    if let Some(len) = declared_len
        && len > limit
    {
        return Err(UploadError::PayloadTooLarge { limit });
    }

    let capacity = declared_len.unwrap_or(0).min(limit).min(16 * 1024 * 1024) as usize;
    let mut buffer = Vec::with_capacity(capacity);
    reader
        .take(limit + 1)
        .read_to_end(&mut buffer)
        .await
        .map_err(UploadError::from_io)?;

    if buffer.len() as u64 > limit {
        return Err(UploadError::PayloadTooLarge { limit });
    }
    Ok(Bytes::from(buffer))
}

const OCTET_STREAM: &str = "application/octet-stream";

/// Content type precedence: explicit value, file extension, magic bytes,
/// remote response header, then `application/octet-stream`.
pub fn resolve_content_type(
    explicit: Option<&str>,
    file_name: &str,
    body: &[u8],
    remote: Option<&str>,
) -> String {
    if let Some(explicit) = explicit.map(str::trim).filter(|ct| !ct.is_empty()) {
        return explicit.to_string();
    }
    if let Some(by_extension) = content_type_for_extension(file_name) {
        return by_extension;
    }
    if let Some(kind) = infer::get(body) {
        return kind.mime_type().to_string();
    }
    remote
        .map(|ct| ct.split(';').next().unwrap_or("").trim())
        .filter(|ct| !ct.is_empty() && !is_generic_binary(ct))
        .map(str::to_string)
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

fn is_generic_binary(content_type: &str) -> bool {
    matches!(
        content_type.to_ascii_lowercase().as_str(),
        "application/octet-stream" | "binary/octet-stream"
    )
}

pub fn content_type_for_extension(file_name: &str) -> Option<String> {
    let (_, extension) = file_name.rsplit('/').next()?.rsplit_once('.')?;
    let content_type = match extension.to_ascii_lowercase().as_str() {
        "pdf" => mime::APPLICATION_PDF.to_string(),
        "jpg" | "jpeg" => mime::IMAGE_JPEG.to_string(),
        "png" => mime::IMAGE_PNG.to_string(),
        "gif" => mime::IMAGE_GIF.to_string(),
        "bmp" => mime::IMAGE_BMP.to_string(),
        "svg" => mime::IMAGE_SVG.to_string(),
        "webp" => "image/webp".to_string(),
        "json" => mime::APPLICATION_JSON.to_string(),
        "txt" => mime::TEXT_PLAIN.to_string(),
        "csv" => mime::TEXT_CSV.to_string(),
        "html" | "htm" => mime::TEXT_HTML.to_string(),
        "xml" => mime::TEXT_XML.to_string(),
        "zip" => "application/zip".to_string(),
        "mp4" => "video/mp4".to_string(),
        _ => return None,
    };
    Some(content_type)
}

/// File extension to use when a name has to be generated for a content type
pub fn extension_for_content_type(content_type: &str) -> String {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let subtype = essence.split('/').nth(1).unwrap_or("");
    let subtype = subtype.split('+').next().unwrap_or("");
    match subtype {
        "" | "octet-stream" => "bin".to_string(),
        "jpeg" => "jpg".to_string(),
        "plain" => "txt".to_string(),
        other => other.to_string(),
    }
}

/// How object names are derived from incoming file names
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NamingPolicy {
    /// Keep the name, so re-uploads overwrite
    #[default]
    Preserve,
    /// Insert `_YYYYMMDD_HHMMSS` before the extension of the last segment
    Timestamped,
}

impl NamingPolicy {
    pub fn apply(self, name: &str, now: DateTime<Utc>) -> String {
        match self {
            NamingPolicy::Preserve => name.to_string(),
            NamingPolicy::Timestamped => {
                let stamp = now.format("%Y%m%d_%H%M%S");
                let (dir, file) = match name.rsplit_once('/') {
                    Some((dir, file)) => (Some(dir), file),
                    None => (None, name),
                };
                let stamped = match file.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, stamp, ext),
                    _ => format!("{}_{}", file, stamp),
                };
                match dir {
                    Some(dir) => format!("{}/{}", dir, stamped),
                    None => stamped,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn test_explicit_content_type_wins() {
        let ct = resolve_content_type(Some("application/x-custom"), "a.pdf", PNG_MAGIC, None);
        assert_eq!(ct, "application/x-custom");
    }

    #[test]
    fn test_extension_before_magic_bytes() {
        assert_eq!(resolve_content_type(None, "scan.PDF", PNG_MAGIC, None), "application/pdf");
        assert_eq!(resolve_content_type(None, "dir/photo.jpeg", b"", None), "image/jpeg");
    }

    #[test]
    fn test_magic_bytes_then_remote_then_default() {
        assert_eq!(resolve_content_type(None, "noext", PNG_MAGIC, None), "image/png");
        assert_eq!(
            resolve_content_type(None, "noext", b"plain", Some("text/plain; charset=utf-8")),
            "text/plain"
        );
        assert_eq!(
            resolve_content_type(None, "noext", b"plain", Some("binary/octet-stream")),
            "application/octet-stream"
        );
        assert_eq!(resolve_content_type(Some("  "), "noext", b"", None), OCTET_STREAM);
    }

    #[test]
    fn test_extension_for_content_type() {
        assert_eq!(extension_for_content_type("image/jpeg"), "jpg");
        assert_eq!(extension_for_content_type("binary/octet-stream"), "bin");
        assert_eq!(extension_for_content_type("application/pdf"), "pdf");
        assert_eq!(extension_for_content_type("image/svg+xml"), "svg");
        assert_eq!(extension_for_content_type(""), "bin");
    }

    #[test]
    fn test_timestamped_naming() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(NamingPolicy::Preserve.apply("a/b.txt", now), "a/b.txt");
        assert_eq!(
            NamingPolicy::Timestamped.apply("a/b.txt", now),
            "a/b_20240305_140709.txt"
        );
        assert_eq!(NamingPolicy::Timestamped.apply("README", now), "README_20240305_140709");
        assert_eq!(NamingPolicy::Timestamped.apply(".env", now), ".env_20240305_140709");
    }

    #[tokio::test]
    async fn test_read_payload_enforces_limit() {
        let ok = read_payload(Box::pin(&b"12345"[..]), None, 5).await.unwrap();
        assert_eq!(ok.len(), 5);

        let err = read_payload(Box::pin(&b"123456"[..]), None, 5).await.unwrap_err();
        assert_eq!(err, UploadError::PayloadTooLarge { limit: 5 });

        let declared = read_payload(Box::pin(&b""[..]), Some(10), 5).await.unwrap_err();
        assert_eq!(declared, UploadError::PayloadTooLarge { limit: 5 });
    }
}
