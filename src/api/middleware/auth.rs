use crate::AppState;
use crate::api::error::AppError;
use crate::utils::auth::validate_service_jwt;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

/// Requires a bearer token issued for the configured service id.
/// Passes everything through when authentication is not configured.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(auth) = state.auth.as_ref() else {
        return Ok(next.run(req).await);
    };

    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let claims = validate_service_jwt(token, auth).map_err(|e| {
        tracing::debug!("Rejected service token: {}", e);
        AppError::Unauthorized("Invalid token".to_string())
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
