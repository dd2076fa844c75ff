use super::types::*;
use super::{
    batch_response, check_batch_len, json_error, multipart_error, products_response, request_scope,
};
use crate::AppState;
use crate::api::error::AppError;
use crate::models::{TenancyContext, TenancyFields, UploadOutcome};
use crate::services::content::{ContentSource, NamingPolicy};
use crate::services::error::UploadError;
use crate::services::upload_service::{NamedPayload, ProductPayloads, UrlUpload};
use axum::{
    Json,
    extract::{Multipart, State, multipart::Field, rejection::JsonRejection},
    response::Response,
};
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use validator::Validate;

/// Standard alphabet, with or without padding
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Text parts of a multipart upload, collected before the `file` part
#[derive(Default)]
struct FormFields {
    tenant_id: String,
    user_id: String,
    product_id: String,
    hash_user_id: bool,
    directory: String,
    content_type: Option<String>,
    naming: NamingPolicy,
}

impl FormFields {
    fn set(&mut self, name: &str, value: String) -> Result<(), AppError> {
        match name {
            "tenant_id" => self.tenant_id = value,
            "user_id" => self.user_id = value,
            "product_id" => self.product_id = value,
            "directory" => self.directory = value,
            "hash_user_id" => self.hash_user_id = matches!(value.trim(), "true" | "1"),
            "content_type" => {
                self.content_type = Some(value).filter(|v| !v.trim().is_empty());
            }
            "naming" => {
                self.naming = serde_json::from_value(serde_json::Value::String(value.clone()))
                    .map_err(|_| AppError::BadRequest(format!("Unknown naming policy: {}", value)))?;
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
        Ok(())
    }

    fn tenancy(&self) -> Result<TenancyContext, AppError> {
        let fields = TenancyFields {
            tenant_id: self.tenant_id.clone(),
            user_id: self.user_id.clone(),
            product_id: self.product_id.clone(),
            hash_user_id: self.hash_user_id,
        };
        fields.validate()?;
        Ok(TenancyContext::try_from(fields)?)
    }
}

async fn read_field(mut field: Field<'_>, limit: u64) -> Result<Bytes, AppError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if (buffer.len() + chunk.len()) as u64 > limit {
            return Err(UploadError::PayloadTooLarge { limit }.into());
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// Reads whatever the client is still sending so the connection is not reset
async fn drain(multipart: &mut Multipart) {
    while let Ok(Some(mut field)) = multipart.next_field().await {
        while let Ok(Some(_)) = field.chunk().await {}
    }
}

#[utoipa::path(
    post,
    path = "/upload/file",
    request_body(content = UploadFileForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored", body = UploadOutcome),
        (status = 400, description = "Invalid tenancy, directory or file name", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "File exceeds the size limit", body = ErrorResponse),
        (status = 503, description = "Storage temporarily unavailable", body = ErrorResponse)
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, AppError> {
    let (cancel, _guard) = request_scope(state.config.request_timeout());
    let mut form = FormFields::default();

    let result: Result<Json<UploadOutcome>, AppError> = async {
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();

            if name == "file" {
                let tenancy = form.tenancy()?;
                let file_name = field
                    .file_name()
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| AppError::BadRequest("file part has no file name".to_string()))?;
                let key = state.upload_service.single_key(
                    &tenancy,
                    &form.directory,
                    &file_name,
                    form.naming,
                )?;
                let part_type = field.content_type().map(|s| s.to_string());
                let data = read_field(field, state.config.max_object_size).await?;

                // The part header is what the browser guessed; the extension
                // and the bytes themselves are checked first
                let source = ContentSource::from_bytes(data, None).with_reported_type(part_type);
                let outcome = state
                    .upload_service
                    .upload_single(key, source, form.content_type.clone(), &cancel)
                    .await?;
                return Ok(Json(outcome));
            }

            let value = field.text().await.map_err(multipart_error)?;
            form.set(&name, value)?;
        }
        Err(AppError::BadRequest("No file provided".to_string()))
    }
    .await;

    if let Err(e) = &result {
        tracing::warn!("Upload failed early: {}. Consuming remaining stream...", e);
        drain(&mut multipart).await;
    }
    result
}

#[utoipa::path(
    post,
    path = "/upload/bytes",
    request_body = UploadBytesRequest,
    responses(
        (status = 200, description = "All files stored", body = BatchResult),
        (status = 207, description = "Some files failed", body = BatchResult),
        (status = 400, description = "Malformed manifest", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "No file could be stored", body = BatchResult)
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn upload_bytes(
    State(state): State<AppState>,
    payload: Result<Json<UploadBytesRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(json_error)?;
    req.validate()?;
    check_batch_len(req.files.len(), state.config.max_batch_items)?;

    let tenancy = TenancyContext::try_from(req.tenancy)?;
    let files = decode_files(req.files)?;

    let (cancel, _guard) = request_scope(state.config.request_timeout());
    let result = state
        .upload_service
        .upload_payloads(&tenancy, &req.directory, files, req.naming, &cancel)
        .await?;
    Ok(batch_response(result))
}

fn decode_files(files: Vec<Base64File>) -> Result<Vec<NamedPayload>, AppError> {
    files
        .into_iter()
        .map(|file| {
            let data = BASE64.decode(file.data_base64.trim()).map_err(|e| {
                AppError::BadRequest(format!("{}: invalid base64: {}", file.file_name, e))
            })?;
            Ok(NamedPayload {
                file_name: file.file_name,
                content_type: file.content_type,
                data: Bytes::from(data),
            })
        })
        .collect()
}

#[utoipa::path(
    post,
    path = "/upload/products",
    request_body = UploadProductsRequest,
    responses(
        (status = 200, description = "All files of all products stored", body = ProductBatchResult),
        (status = 207, description = "Some files failed", body = ProductBatchResult),
        (status = 400, description = "Malformed manifest", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "No file could be stored", body = ProductBatchResult)
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn upload_products(
    State(state): State<AppState>,
    payload: Result<Json<UploadProductsRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(json_error)?;
    req.validate()?;
    let total: usize = req.products.iter().map(|p| p.files.len()).sum();
    check_batch_len(total, state.config.max_batch_items)?;

    let products = req
        .products
        .into_iter()
        .map(|product| {
            let tenancy = TenancyContext::try_from(TenancyFields {
                tenant_id: req.tenant_id.clone(),
                user_id: req.user_id.clone(),
                product_id: product.product_id,
                hash_user_id: req.hash_user_id,
            })?;
            Ok(ProductPayloads {
                tenancy,
                files: decode_files(product.files)?,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let (cancel, _guard) = request_scope(state.config.request_timeout());
    let result = state
        .upload_service
        .upload_product_payloads(&req.directory, products, req.naming, &cancel)
        .await?;
    Ok(products_response(result))
}

#[utoipa::path(
    post,
    path = "/upload/urls",
    request_body = UploadUrlsRequest,
    responses(
        (status = 200, description = "All URLs copied", body = BatchResult),
        (status = 207, description = "Some URLs failed", body = BatchResult),
        (status = 400, description = "Malformed manifest", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "No URL could be copied", body = BatchResult)
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn upload_urls(
    State(state): State<AppState>,
    payload: Result<Json<UploadUrlsRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(json_error)?;
    req.validate()?;
    check_batch_len(req.items.len(), state.config.max_batch_items)?;

    let tenancy = TenancyContext::try_from(req.tenancy)?;
    let uploads = req
        .items
        .into_iter()
        .map(|item| UrlUpload {
            url: item.url,
            file_name: item.file_name,
            content_type: item.content_type,
        })
        .collect();

    let (cancel, _guard) = request_scope(state.config.request_timeout());
    let result = state
        .upload_service
        .upload_urls(&tenancy, &req.directory, uploads, req.naming, &cancel)
        .await?;
    Ok(batch_response(result))
}

#[utoipa::path(
    post,
    path = "/upload/archive",
    request_body = ArchiveUrlRequest,
    responses(
        (status = 200, description = "All entries stored", body = BatchResult),
        (status = 207, description = "Some entries failed", body = BatchResult),
        (status = 400, description = "Malformed manifest", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Archive exceeds the size or entry limit", body = ErrorResponse),
        (status = 422, description = "Archive is malformed or contains unsafe paths", body = ErrorResponse),
        (status = 502, description = "Archive could not be fetched or nothing was stored")
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn upload_archive_url(
    State(state): State<AppState>,
    payload: Result<Json<ArchiveUrlRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(json_error)?;
    req.validate()?;

    let tenancy = TenancyContext::try_from(req.tenancy)?;
    let (cancel, _guard) = request_scope(state.config.request_timeout());
    let result = state
        .upload_service
        .upload_archive_from_url(&tenancy, &req.directory, &req.url, req.naming, &cancel)
        .await?;
    Ok(batch_response(result))
}

#[utoipa::path(
    post,
    path = "/upload/archive/file",
    request_body(content = UploadArchiveForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "All entries stored", body = BatchResult),
        (status = 207, description = "Some entries failed", body = BatchResult),
        (status = 400, description = "Invalid tenancy or directory", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Archive exceeds the size or entry limit", body = ErrorResponse),
        (status = 422, description = "Archive is malformed or contains unsafe paths", body = ErrorResponse),
        (status = 502, description = "No entry could be stored", body = BatchResult)
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn upload_archive_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let (cancel, _guard) = request_scope(state.config.request_timeout());
    let mut form = FormFields::default();

    let result: Result<Response, AppError> = async {
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();

            if name == "file" {
                let tenancy = form.tenancy()?;
                let reader = StreamReader::new(field.map_err(std::io::Error::other));
                let result = state
                    .upload_service
                    .upload_archive(&tenancy, &form.directory, reader, form.naming, &cancel)
                    .await?;
                return Ok(batch_response(result));
            }

            let value = field.text().await.map_err(multipart_error)?;
            form.set(&name, value)?;
        }
        Err(AppError::BadRequest("No archive provided".to_string()))
    }
    .await;

    if let Err(e) = &result {
        tracing::warn!("Archive upload failed early: {}. Consuming remaining stream...", e);
        drain(&mut multipart).await;
    }
    result
}
