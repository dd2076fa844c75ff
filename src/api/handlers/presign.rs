use super::types::{PresignRequest, PresignSourceRequest};
use super::{json_error, request_scope};
use crate::AppState;
use crate::api::error::AppError;
use crate::models::{PresignedLink, TenancyContext};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use std::time::Duration;
use validator::Validate;

#[utoipa::path(
    post,
    path = "/presign",
    request_body = PresignRequest,
    responses(
        (status = 200, description = "Link issued; `clamped` reports an adjusted validity", body = PresignedLink),
        (status = 400, description = "Key outside the caller's namespace or malformed request", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "Source could not be fetched or signed", body = ErrorResponse)
    ),
    security(
        ("jwt" = [])
    ),
    tag = "presign"
)]
pub async fn presign(
    State(state): State<AppState>,
    payload: Result<Json<PresignRequest>, JsonRejection>,
) -> Result<Json<PresignedLink>, AppError> {
    let Json(req) = payload.map_err(json_error)?;
    req.validate()?;

    let tenancy = TenancyContext::try_from(req.tenancy)?;
    let validity = req.validity_secs.map(Duration::from_secs);

    let link = match req.source {
        PresignSourceRequest::Key { key } => {
            state
                .upload_service
                .presign_key(&tenancy, &key, validity)
                .await?
        }
        PresignSourceRequest::Url {
            url,
            directory,
            file_name,
            content_type,
        } => {
            let (cancel, _guard) = request_scope(state.config.request_timeout());
            state
                .upload_service
                .presign_url(
                    &tenancy,
                    &directory,
                    &url,
                    file_name,
                    content_type,
                    validity,
                    &cancel,
                )
                .await?
        }
    };

    tracing::info!(
        "🔗 Presigned {} for {}s{}",
        link.key,
        link.granted_validity_secs,
        if link.clamped { " (clamped)" } else { "" }
    );
    Ok(Json(link))
}
