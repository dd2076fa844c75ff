use crate::config::UploadConfig;
use crate::services::content::extension_for_content_type;
use crate::services::error::UploadError;
use crate::utils::hash::short_digest;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use percent_encoding::percent_decode_str;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tokio_util::io::StreamReader;
use url::Url;

/// Streams external URLs with bounded time and size
#[derive(Clone)]
pub struct RemoteFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

/// Open response whose body has not been read yet
pub struct RemoteBody {
    pub url: String,
    /// `Content-Type` header without parameters
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    /// Last URL path segment, or a generated name when the path has none
    pub file_name: String,
    response: reqwest::Response,
    limit: u64,
}

impl RemoteFetcher {
    pub fn new(
        connect_timeout: Duration,
        timeout: Option<Duration>,
        max_bytes: u64,
    ) -> Result<Self, UploadError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| UploadError::SourceRead(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, max_bytes })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self, UploadError> {
        Self::new(
            config.fetch_connect_timeout(),
            config.fetch_timeout(),
            config.max_object_size,
        )
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Same client, different byte ceiling (archives are larger than objects)
    pub fn with_max_bytes(&self, max_bytes: u64) -> Self {
        Self {
            client: self.client.clone(),
            max_bytes,
        }
    }

    /// Parses a caller-supplied URL, accepting only http and https
    pub fn parse_url(raw: &str) -> Result<Url, UploadError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| UploadError::InvalidUrl(format!("{}: {}", raw, e)))?;
        check_scheme(&url)?;
        Ok(url)
    }

    /// Sends the request and checks status and declared length. The body is
    /// left on the wire for the caller to stream.
    pub async fn fetch(&self, url: &Url) -> Result<RemoteBody, UploadError> {
        check_scheme(url)?;
        let url_str = url.to_string();

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url_str, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::FetchHttpError {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        if let Some(len) = content_length
            && len > self.max_bytes
        {
            return Err(UploadError::FetchSizeExceeded {
                url: url_str,
                limit: self.max_bytes,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
            .filter(|v| !v.is_empty());

        let file_name = file_name_for(url, content_type.as_deref());

        tracing::debug!(
            "Fetched headers for {}: type={:?}, length={:?}",
            url_str,
            content_type,
            content_length
        );

        Ok(RemoteBody {
            url: url_str,
            content_type,
            content_length,
            file_name,
            response,
            limit: self.max_bytes,
        })
    }
}

impl RemoteBody {
    /// Body chunks, failing with `FetchSizeExceeded` once the ceiling is crossed
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, UploadError>> {
        let RemoteBody {
            url,
            response,
            limit,
            ..
        } = self;

        stream::try_unfold(
            (response, 0u64, url),
            move |(mut response, seen, url)| async move {
                let chunk = response
                    .chunk()
                    .await
                    .map_err(|e| map_reqwest_error(&url, e))?;
                match chunk {
                    None => Ok(None),
                    Some(chunk) => {
                        let seen = seen + chunk.len() as u64;
                        if seen > limit {
                            return Err(UploadError::FetchSizeExceeded { url, limit });
                        }
                        Ok(Some((chunk, (response, seen, url))))
                    }
                }
            },
        )
        .boxed()
    }

    /// `AsyncRead` view of the body. Errors travel as `io::Error` and can be
    /// recovered with `UploadError::from_io`.
    pub fn into_reader(self) -> StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes> {
        StreamReader::new(self.into_stream().map_err(UploadError::into_io).boxed())
    }

    /// Reads the whole body into memory
    pub async fn bytes(self) -> Result<Bytes, UploadError> {
        let capacity = self
            .content_length
            .unwrap_or(0)
            .min(self.limit)
            .min(16 * 1024 * 1024) as usize;
        let mut buffer = BytesMut::with_capacity(capacity);
        let mut chunks = self.into_stream();
        while let Some(chunk) = chunks.try_next().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }
}

fn check_scheme(url: &Url) -> Result<(), UploadError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(UploadError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            other, url
        ))),
    }
}

fn map_reqwest_error(url: &str, err: reqwest::Error) -> UploadError {
    if err.is_timeout() {
        UploadError::FetchTimeout(url.to_string())
    } else if let Some(status) = err.status() {
        UploadError::FetchHttpError {
            url: url.to_string(),
            status: status.as_u16(),
        }
    } else if err.is_builder() {
        UploadError::InvalidUrl(format!("{}: {}", url, err))
    } else {
        UploadError::FetchFailed {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Decoded last path segment, or `file_{digest}.{ext}` when it is unusable
pub fn file_name_for(url: &Url, content_type: Option<&str>) -> String {
    let candidate = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().trim().to_string())
        .filter(|name| {
            !name.is_empty()
                && name != "."
                && name != ".."
                && !name.contains('/')
                && !name.contains('\\')
                && !name.chars().any(char::is_control)
        });

    candidate.unwrap_or_else(|| {
        let extension = extension_for_content_type(content_type.unwrap_or(""));
        format!(
            "file_{}.{}",
            short_digest(url.as_str().as_bytes()),
            extension
        )
    })
}
