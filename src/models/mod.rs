use crate::services::error::{ErrorKind, UploadError};
use crate::utils::hash::calculate_hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Tenant/user/product triple scoping every key derived during a request.
///
/// Each field is exactly one key segment: required, non-empty and free of
/// `/`. Construction validates; there is no way to mutate afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "TenancyFields")]
pub struct TenancyContext {
    tenant_id: String,
    user_id: String,
    product_id: String,
}

/// Wire form of a tenancy context
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct TenancyFields {
    #[validate(length(min = 1, max = 128, message = "tenant_id is required"))]
    pub tenant_id: String,
    #[validate(length(min = 1, max = 256, message = "user_id is required"))]
    pub user_id: String,
    #[validate(length(min = 1, max = 128, message = "product_id is required"))]
    pub product_id: String,
    /// Store the SHA-256 of `user_id` instead of the raw value
    #[serde(default)]
    pub hash_user_id: bool,
}

impl TenancyContext {
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        product_id: impl Into<String>,
    ) -> Result<Self, UploadError> {
        let tenant_id = tenancy_segment("tenant_id", tenant_id.into())?;
        let user_id = tenancy_segment("user_id", user_id.into())?;
        let product_id = tenancy_segment("product_id", product_id.into())?;
        Ok(Self {
            tenant_id,
            user_id,
            product_id,
        })
    }

    /// Uses the hex SHA-256 of a raw user identifier (phone number, email) as
    /// the user segment so the identifier never appears in object keys.
    pub fn with_hashed_user(
        tenant_id: impl Into<String>,
        raw_user: &str,
        product_id: impl Into<String>,
    ) -> Result<Self, UploadError> {
        let raw_user = raw_user.trim();
        if raw_user.is_empty() {
            return Err(UploadError::InvalidKeyComponent(
                "user_id must not be empty".to_string(),
            ));
        }
        Self::new(tenant_id, calculate_hash(raw_user.as_bytes()), product_id)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// `{tenant}/{user}/{product}` without trailing slash
    pub fn prefix(&self) -> String {
        format!("{}/{}/{}", self.tenant_id, self.user_id, self.product_id)
    }
}

impl TryFrom<TenancyFields> for TenancyContext {
    type Error = UploadError;

    fn try_from(fields: TenancyFields) -> Result<Self, Self::Error> {
        if fields.hash_user_id {
            Self::with_hashed_user(fields.tenant_id, &fields.user_id, fields.product_id)
        } else {
            Self::new(fields.tenant_id, fields.user_id, fields.product_id)
        }
    }
}

fn tenancy_segment(field: &str, value: String) -> Result<String, UploadError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(UploadError::InvalidKeyComponent(format!(
            "{} must not be empty",
            field
        )));
    }
    if trimmed.contains('/') || trimmed.contains('\\') || trimmed == "." || trimmed == ".." {
        return Err(UploadError::InvalidKeyComponent(format!(
            "{} must be a single path segment: '{}'",
            field, trimmed
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ItemError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&UploadError> for ItemError {
    fn from(err: &UploadError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result of one upload attempt chain. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UploadOutcome {
    pub key: String,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
    pub attempts: u32,
}

impl UploadOutcome {
    pub fn succeeded(
        key: String,
        size: u64,
        content_type: String,
        location: String,
        attempts: u32,
    ) -> Self {
        Self {
            key,
            status: UploadStatus::Succeeded,
            size: Some(size),
            content_type: Some(content_type),
            location: Some(location),
            error: None,
            attempts,
        }
    }

    pub fn failed(key: String, err: &UploadError, attempts: u32) -> Self {
        Self {
            key,
            status: UploadStatus::Failed,
            size: None,
            content_type: None,
            location: None,
            error: Some(ItemError::from(err)),
            attempts,
        }
    }

    pub fn cancelled(key: String) -> Self {
        Self {
            key,
            status: UploadStatus::Cancelled,
            size: None,
            content_type: None,
            location: None,
            error: Some(ItemError::from(&UploadError::Cancelled)),
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UploadStatus::Succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Succeeded,
    PartialFailure,
    TotalFailure,
}

/// Ordered outcomes of one orchestrator invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BatchResult {
    pub status: BatchStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub items: Vec<UploadOutcome>,
}

impl BatchResult {
    /// Aggregates outcomes that are already in input order
    pub fn from_outcomes(items: Vec<UploadOutcome>) -> Self {
        let succeeded = items.iter().filter(|o| o.is_success()).count();
        let cancelled = items
            .iter()
            .filter(|o| o.status == UploadStatus::Cancelled)
            .count();
        let failed = items.len() - succeeded - cancelled;

        let status = if succeeded == items.len() {
            BatchStatus::Succeeded
        } else if succeeded == 0 {
            BatchStatus::TotalFailure
        } else {
            BatchStatus::PartialFailure
        };

        Self {
            status,
            succeeded,
            failed,
            cancelled,
            items,
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        self.items.iter().map(|o| o.key.as_str()).collect()
    }
}

/// Outcomes of one product within a multi-product upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProductBatch {
    pub product_id: String,
    pub result: BatchResult,
}

/// Per-product results with totals across the whole request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProductBatchResult {
    pub status: BatchStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub products: Vec<ProductBatch>,
}

impl ProductBatchResult {
    pub fn from_batches(products: Vec<ProductBatch>) -> Self {
        let total: usize = products.iter().map(|p| p.result.items.len()).sum();
        let succeeded = products.iter().map(|p| p.result.succeeded).sum();
        let failed = products.iter().map(|p| p.result.failed).sum();
        let cancelled = products.iter().map(|p| p.result.cancelled).sum();

        let status = if succeeded == total {
            BatchStatus::Succeeded
        } else if succeeded == 0 {
            BatchStatus::TotalFailure
        } else {
            BatchStatus::PartialFailure
        };

        Self {
            status,
            succeeded,
            failed,
            cancelled,
            products,
        }
    }
}

/// Time-bounded access URL. Validity is enforced by the backend, never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PresignedLink {
    pub key: String,
    pub url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub requested_validity_secs: u64,
    pub granted_validity_secs: u64,
    /// True when the requested validity was outside the allowed range
    pub clamped: bool,
}
