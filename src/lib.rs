pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::{AuthConfig, UploadConfig};
use crate::services::error::UploadError;
use crate::services::fetcher::RemoteFetcher;
use crate::services::orchestrator::{OrchestratorConfig, UploadOrchestrator};
use crate::services::presign::PresignedLinkIssuer;
use crate::services::storage::StorageClient;
use crate::services::upload_service::UploadService;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::upload::upload_file,
        api::handlers::upload::upload_bytes,
        api::handlers::upload::upload_products,
        api::handlers::upload::upload_urls,
        api::handlers::upload::upload_archive_url,
        api::handlers::upload::upload_archive_file,
        api::handlers::presign::presign,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::types::Base64File,
            api::handlers::types::UploadBytesRequest,
            api::handlers::types::ProductFiles,
            api::handlers::types::UploadProductsRequest,
            api::handlers::types::UrlItem,
            api::handlers::types::UploadUrlsRequest,
            api::handlers::types::ArchiveUrlRequest,
            api::handlers::types::PresignSourceRequest,
            api::handlers::types::PresignRequest,
            api::handlers::types::UploadFileForm,
            api::handlers::types::UploadArchiveForm,
            api::handlers::types::ErrorResponse,
            models::TenancyFields,
            models::UploadStatus,
            models::ItemError,
            models::UploadOutcome,
            models::BatchStatus,
            models::BatchResult,
            models::ProductBatch,
            models::ProductBatchResult,
            models::PresignedLink,
            services::content::NamingPolicy,
            services::error::ErrorKind,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "upload", description = "File, URL and archive uploads"),
        (name = "presign", description = "Time-limited access links"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageClient>,
    pub upload_service: Arc<UploadService>,
    pub config: UploadConfig,
    /// `None` disables bearer-token checks
    pub auth: Option<AuthConfig>,
}

impl AppState {
    /// Wires fetcher, orchestrator and link issuer around one storage client
    pub fn new(
        storage: Arc<dyn StorageClient>,
        config: UploadConfig,
        auth: Option<AuthConfig>,
    ) -> Result<Self, UploadError> {
        let fetcher = RemoteFetcher::from_config(&config)?;
        let orchestrator = UploadOrchestrator::new(
            storage.clone(),
            fetcher,
            OrchestratorConfig::from(&config),
        );
        let issuer = PresignedLinkIssuer::from_config(orchestrator.clone(), &config);
        let upload_service = Arc::new(UploadService::new(orchestrator, issuer, &config));

        Ok(Self {
            storage,
            upload_service,
            config,
            auth,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    // Headroom for multipart boundaries and JSON/base64 overhead
    let overhead = 10 * 1024 * 1024;
    let object_limit = (state.config.max_object_size + overhead) as usize;
    let archive_limit = (state.config.max_archive_size + overhead) as usize;

    let protected = Router::new()
        .route(
            "/upload/file",
            post(api::handlers::upload::upload_file).layer(DefaultBodyLimit::max(object_limit)),
        )
        .route(
            "/upload/bytes",
            post(api::handlers::upload::upload_bytes).layer(DefaultBodyLimit::max(archive_limit)),
        )
        .route(
            "/upload/products",
            post(api::handlers::upload::upload_products)
                .layer(DefaultBodyLimit::max(archive_limit)),
        )
        .route("/upload/urls", post(api::handlers::upload::upload_urls))
        .route(
            "/upload/archive",
            post(api::handlers::upload::upload_archive_url),
        )
        .route(
            "/upload/archive/file",
            post(api::handlers::upload::upload_archive_file)
                .layer(DefaultBodyLimit::max(archive_limit)),
        )
        .route("/presign", post(api::handlers::presign::presign))
        .route_layer(from_fn_with_state(
            state.clone(),
            api::middleware::auth::auth_middleware,
        ));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .merge(protected)
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
