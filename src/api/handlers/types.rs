use crate::models::TenancyFields;
use crate::services::content::NamingPolicy;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Serialize, Deserialize, ToSchema, Validate)]
pub struct Base64File {
    #[validate(length(min = 1, max = 1024, message = "file_name is required"))]
    pub file_name: String,
    pub content_type: Option<String>,
    /// Standard base64, padding optional
    pub data_base64: String,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct UploadBytesRequest {
    #[validate(nested)]
    pub tenancy: TenancyFields,
    #[validate(length(min = 1, max = 255, message = "directory is required"))]
    pub directory: String,
    #[validate(length(min = 1, message = "at least one file is required"), nested)]
    pub files: Vec<Base64File>,
    #[serde(default)]
    pub naming: NamingPolicy,
}

#[derive(Serialize, Deserialize, ToSchema, Validate)]
pub struct ProductFiles {
    #[validate(length(min = 1, max = 128, message = "product_id is required"))]
    pub product_id: String,
    #[validate(length(min = 1, message = "at least one file is required"), nested)]
    pub files: Vec<Base64File>,
}

/// Byte uploads for several products of one user. Each product is stored
/// under its own `{tenant}/{user}/{product}` prefix.
#[derive(Deserialize, ToSchema, Validate)]
pub struct UploadProductsRequest {
    #[validate(length(min = 1, max = 128, message = "tenant_id is required"))]
    pub tenant_id: String,
    #[validate(length(min = 1, max = 256, message = "user_id is required"))]
    pub user_id: String,
    #[serde(default)]
    pub hash_user_id: bool,
    #[validate(length(min = 1, max = 255, message = "directory is required"))]
    pub directory: String,
    #[validate(length(min = 1, message = "at least one product is required"), nested)]
    pub products: Vec<ProductFiles>,
    #[serde(default)]
    pub naming: NamingPolicy,
}

#[derive(Serialize, Deserialize, ToSchema, Validate)]
pub struct UrlItem {
    #[validate(url(message = "url must be an absolute URL"))]
    pub url: String,
    /// Defaults to the last path segment of `url`
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct UploadUrlsRequest {
    #[validate(nested)]
    pub tenancy: TenancyFields,
    #[validate(length(min = 1, max = 255, message = "directory is required"))]
    pub directory: String,
    #[validate(length(min = 1, message = "at least one url is required"), nested)]
    pub items: Vec<UrlItem>,
    #[serde(default)]
    pub naming: NamingPolicy,
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct ArchiveUrlRequest {
    #[validate(nested)]
    pub tenancy: TenancyFields,
    #[validate(length(min = 1, max = 255, message = "directory is required"))]
    pub directory: String,
    #[validate(url(message = "url must be an absolute URL"))]
    pub url: String,
    #[serde(default)]
    pub naming: NamingPolicy,
}

#[derive(Deserialize, ToSchema)]
#[serde(untagged)]
pub enum PresignSourceRequest {
    /// Full key of an object inside the caller's namespace
    Key { key: String },
    /// Remote content to upload before signing
    Url {
        url: String,
        directory: String,
        file_name: Option<String>,
        content_type: Option<String>,
    },
}

#[derive(Deserialize, ToSchema, Validate)]
pub struct PresignRequest {
    #[validate(nested)]
    pub tenancy: TenancyFields,
    pub source: PresignSourceRequest,
    /// Requested validity; clamped into the allowed range
    pub validity_secs: Option<u64>,
}

/// Multipart body of `/upload/file`. Text fields must precede `file`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadFileForm {
    pub tenant_id: String,
    pub user_id: String,
    pub product_id: String,
    pub hash_user_id: Option<bool>,
    pub directory: String,
    pub content_type: Option<String>,
    pub naming: Option<NamingPolicy>,
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// Multipart body of `/upload/archive/file`. Text fields must precede `file`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadArchiveForm {
    pub tenant_id: String,
    pub user_id: String,
    pub product_id: String,
    pub hash_user_id: Option<bool>,
    pub directory: String,
    pub naming: Option<NamingPolicy>,
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenancy() -> serde_json::Value {
        json!({"tenant_id": "acme", "user_id": "u1", "product_id": "p1"})
    }

    #[test]
    fn test_url_manifest_validation() {
        let empty: UploadUrlsRequest = serde_json::from_value(json!({
            "tenancy": tenancy(),
            "directory": "docs",
            "items": []
        }))
        .unwrap();
        assert!(empty.validate().is_err());

        let bad_url: UploadUrlsRequest = serde_json::from_value(json!({
            "tenancy": tenancy(),
            "directory": "docs",
            "items": [{"url": "not a url"}]
        }))
        .unwrap();
        assert!(bad_url.validate().is_err());

        let ok: UploadUrlsRequest = serde_json::from_value(json!({
            "tenancy": tenancy(),
            "directory": "docs",
            "items": [{"url": "https://example.com/a.pdf", "content_type": "application/pdf"}]
        }))
        .unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_bytes_manifest_validation() {
        let nameless: UploadBytesRequest = serde_json::from_value(json!({
            "tenancy": tenancy(),
            "directory": "docs",
            "files": [{"file_name": "", "data_base64": "aGk="}]
        }))
        .unwrap();
        assert!(nameless.validate().is_err());

        let ok: UploadBytesRequest = serde_json::from_value(json!({
            "tenancy": tenancy(),
            "directory": "docs",
            "files": [{"file_name": "a.txt", "data_base64": "aGk="}]
        }))
        .unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_products_manifest_validation() {
        let no_files: UploadProductsRequest = serde_json::from_value(json!({
            "tenant_id": "acme",
            "user_id": "u1",
            "directory": "docs",
            "products": [{"product_id": "p1", "files": []}]
        }))
        .unwrap();
        assert!(no_files.validate().is_err());

        let ok: UploadProductsRequest = serde_json::from_value(json!({
            "tenant_id": "acme",
            "user_id": "u1",
            "directory": "docs",
            "products": [{"product_id": "p1", "files": [{"file_name": "a.txt", "data_base64": "aGk="}]}]
        }))
        .unwrap();
        assert!(ok.validate().is_ok());
        assert_eq!(ok.naming, NamingPolicy::Preserve);
    }
}
