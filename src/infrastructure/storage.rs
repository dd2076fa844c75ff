use crate::config::StorageConfig;
use crate::services::storage::{MemoryStorageClient, S3StorageClient, StorageClient};
use aws_sdk_s3::config::Region;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn setup_s3_storage(config: &StorageConfig) -> Arc<dyn StorageClient> {
    info!(
        "☁️  S3 Storage: {} (Bucket: {}, Region: {})",
        config.endpoint_url.as_deref().unwrap_or("aws"),
        config.bucket,
        config.region
    );

    let mut loader = aws_config::from_env()
        .region(Region::new(config.region.clone()))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "static",
        ));
    if let Some(endpoint) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let aws_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.endpoint_url.is_some())
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

    match s3_client.head_bucket().bucket(&config.bucket).send().await {
        Ok(_) => info!("✅ Bucket '{}' is reachable", config.bucket),
        Err(e) => warn!(
            "⚠️  Bucket '{}' is not reachable yet: {}",
            config.bucket,
            aws_sdk_s3::error::DisplayErrorContext(&e)
        ),
    }

    Arc::new(S3StorageClient::new(
        s3_client,
        config.bucket.clone(),
        config.resolved_public_base_url(),
    ))
}

pub fn setup_memory_storage() -> Arc<dyn StorageClient> {
    info!("🧪 In-memory storage backend (objects are lost on exit)");
    Arc::new(MemoryStorageClient::default())
}
