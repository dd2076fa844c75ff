use crate::services::error::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::BadRequest(errors.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Upload(e) => upload_status(e),
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) | AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn upload_status(err: &UploadError) -> StatusCode {
    match err {
        UploadError::InvalidKeyComponent(_)
        | UploadError::InvalidUrl(_)
        | UploadError::InvalidPresignValidity(_) => StatusCode::BAD_REQUEST,
        UploadError::UnsafeArchiveEntry(_) | UploadError::InvalidArchive(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        UploadError::ArchiveTooLarge(_)
        | UploadError::PayloadTooLarge { .. }
        | UploadError::FetchSizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        UploadError::FetchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        UploadError::FetchFailed { .. } | UploadError::FetchHttpError { .. } => {
            StatusCode::BAD_GATEWAY
        }
        UploadError::StorageTransient(_) => StatusCode::SERVICE_UNAVAILABLE,
        UploadError::StoragePermanent(_) => StatusCode::BAD_GATEWAY,
        UploadError::SourceRead(_) => StatusCode::BAD_REQUEST,
        UploadError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::Upload(e) => {
                if status.is_server_error() {
                    tracing::warn!("Upload error: {}", e);
                }
                e.to_string()
            }
            AppError::Unauthorized(msg)
            | AppError::BadRequest(msg)
            | AppError::PayloadTooLarge(msg) => msg,
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                "Internal Server Error".to_string()
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
