pub mod health;
pub mod presign;
pub mod types;
pub mod upload;

use crate::api::error::AppError;
use crate::models::{BatchResult, BatchStatus, ProductBatchResult};
use axum::{
    Json,
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};

/// 200 when every item succeeded, 207 on partial failure, 502 when nothing did
pub fn batch_response(result: BatchResult) -> Response {
    (batch_status(result.status), Json(result)).into_response()
}

/// Same status rules as `batch_response`, over all products together
pub fn products_response(result: ProductBatchResult) -> Response {
    (batch_status(result.status), Json(result)).into_response()
}

fn batch_status(status: BatchStatus) -> StatusCode {
    match status {
        BatchStatus::Succeeded => StatusCode::OK,
        BatchStatus::PartialFailure => StatusCode::MULTI_STATUS,
        BatchStatus::TotalFailure => StatusCode::BAD_GATEWAY,
    }
}

/// Cancellation token for one request. It fires when the deadline passes or
/// when the returned guard is dropped with the handler (client went away).
pub(crate) fn request_scope(deadline: Duration) -> (CancellationToken, DropGuard) {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!("⏱️  Request deadline of {:?} reached, no further uploads will start", deadline);
                timer.cancel();
            }
            _ = timer.cancelled() => {}
        }
    });
    let guard = token.clone().drop_guard();
    (token, guard)
}

pub(crate) fn json_error(rejection: JsonRejection) -> AppError {
    AppError::BadRequest(rejection.body_text())
}

pub(crate) fn multipart_error(err: MultipartError) -> AppError {
    let message = err.to_string();
    if message.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(message)
    }
}

pub(crate) fn check_batch_len(len: usize, max: usize) -> Result<(), AppError> {
    if len > max {
        return Err(AppError::BadRequest(format!(
            "batch of {} items exceeds the limit of {}",
            len, max
        )));
    }
    Ok(())
}
