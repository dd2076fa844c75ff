use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Failures of the upload pipeline, classified for retry decisions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Invalid key component: {0}")]
    InvalidKeyComponent(String),

    #[error("Unsafe archive entry: {0}")]
    UnsafeArchiveEntry(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Archive exceeds limit: {0}")]
    ArchiveTooLarge(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timed out fetching {0}")]
    FetchTimeout(String),

    #[error("Failed to fetch {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("Remote server returned HTTP {status} for {url}")]
    FetchHttpError { url: String, status: u16 },

    #[error("Remote content exceeds {limit} bytes: {url}")]
    FetchSizeExceeded { url: String, limit: u64 },

    #[error("Payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("Failed to read upload source: {0}")]
    SourceRead(String),

    #[error("Transient storage error: {0}")]
    StorageTransient(String),

    #[error("Storage rejected request: {0}")]
    StoragePermanent(String),

    #[error("Invalid link validity: {0}")]
    InvalidPresignValidity(String),

    #[error("Cancelled before dispatch")]
    Cancelled,
}

/// Serializable classification of an `UploadError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidKeyComponent,
    UnsafeArchiveEntry,
    InvalidArchive,
    ArchiveTooLarge,
    InvalidUrl,
    FetchTimeout,
    FetchFailed,
    FetchHttpError,
    FetchSizeExceeded,
    PayloadTooLarge,
    SourceRead,
    StorageTransient,
    StoragePermanent,
    InvalidPresignValidity,
    Cancelled,
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::InvalidKeyComponent(_) => ErrorKind::InvalidKeyComponent,
            UploadError::UnsafeArchiveEntry(_) => ErrorKind::UnsafeArchiveEntry,
            UploadError::InvalidArchive(_) => ErrorKind::InvalidArchive,
            UploadError::ArchiveTooLarge(_) => ErrorKind::ArchiveTooLarge,
            UploadError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            UploadError::FetchTimeout(_) => ErrorKind::FetchTimeout,
            UploadError::FetchFailed { .. } => ErrorKind::FetchFailed,
            UploadError::FetchHttpError { .. } => ErrorKind::FetchHttpError,
            UploadError::FetchSizeExceeded { .. } => ErrorKind::FetchSizeExceeded,
            UploadError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            UploadError::SourceRead(_) => ErrorKind::SourceRead,
            UploadError::StorageTransient(_) => ErrorKind::StorageTransient,
            UploadError::StoragePermanent(_) => ErrorKind::StoragePermanent,
            UploadError::InvalidPresignValidity(_) => ErrorKind::InvalidPresignValidity,
            UploadError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether another attempt can succeed: timeouts, connection failures,
    /// 5xx/429 from a remote origin and transient backend errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::FetchTimeout(_)
            | UploadError::FetchFailed { .. }
            | UploadError::StorageTransient(_) => true,
            UploadError::FetchHttpError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Errors that mean the request itself cannot be trusted
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            UploadError::InvalidKeyComponent(_)
                | UploadError::UnsafeArchiveEntry(_)
                | UploadError::InvalidArchive(_)
                | UploadError::ArchiveTooLarge(_)
                | UploadError::InvalidUrl(_)
                | UploadError::PayloadTooLarge { .. }
                | UploadError::InvalidPresignValidity(_)
        )
    }

    /// Wraps the error so it survives a trip through `std::io` readers
    pub fn into_io(self) -> std::io::Error {
        std::io::Error::other(self)
    }

    /// Recovers an `UploadError` carried inside an I/O error, falling back to `SourceRead`
    pub fn from_io(err: std::io::Error) -> Self {
        if let Some(inner) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<UploadError>())
        {
            return inner.clone();
        }
        UploadError::SourceRead(err.to_string())
    }
}
