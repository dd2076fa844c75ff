use std::env;
use std::time::Duration;

/// Upload orchestration limits and timeouts
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Worker pool size per batch (default: 8)
    pub concurrency_limit: usize,

    /// Total attempts per item, first try included (default: 3)
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds (default: 200)
    pub backoff_base_ms: u64,

    /// Maximum size of a single stored object in bytes (default: 256 MB)
    pub max_object_size: u64,

    /// Maximum size of a staged ZIP archive in bytes (default: 1 GB)
    pub max_archive_size: u64,

    /// Maximum number of records in a ZIP archive (default: 10000)
    pub max_archive_entries: usize,

    /// Maximum number of items accepted in one batch request (default: 500)
    pub max_batch_items: usize,

    /// Connect timeout for remote fetches in seconds (default: 30)
    pub fetch_connect_timeout_secs: u64,

    /// Overall transfer timeout for remote fetches, `None` means no cap
    pub fetch_timeout_secs: Option<u64>,

    /// Presigned link validity when the caller does not ask for one (default: 600)
    pub presign_default_validity_secs: u64,

    /// Upper bound for presigned link validity (default: 24 hours)
    pub presign_max_validity_secs: u64,

    /// Per-request deadline for upload endpoints in seconds (default: 300)
    pub request_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            max_attempts: 3,
            backoff_base_ms: 200,
            max_object_size: 256 * 1024 * 1024, // 256 MB
            max_archive_size: 1024 * 1024 * 1024, // 1 GB
            max_archive_entries: 10_000,
            max_batch_items: 500,
            fetch_connect_timeout_secs: 30,
            fetch_timeout_secs: None,
            presign_default_validity_secs: 600,
            presign_max_validity_secs: 24 * 60 * 60,
            request_timeout_secs: 300,
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            concurrency_limit: env_parse("UPLOAD_CONCURRENCY_LIMIT")
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.concurrency_limit),

            max_attempts: env_parse("UPLOAD_MAX_ATTEMPTS")
                .filter(|v: &u32| *v > 0)
                .unwrap_or(default.max_attempts),

            backoff_base_ms: env_parse("UPLOAD_BACKOFF_BASE_MS").unwrap_or(default.backoff_base_ms),

            max_object_size: env_parse("UPLOAD_MAX_OBJECT_SIZE").unwrap_or(default.max_object_size),

            max_archive_size: env_parse("UPLOAD_MAX_ARCHIVE_SIZE")
                .unwrap_or(default.max_archive_size),

            max_archive_entries: env_parse("UPLOAD_MAX_ARCHIVE_ENTRIES")
                .unwrap_or(default.max_archive_entries),

            max_batch_items: env_parse("UPLOAD_MAX_BATCH_ITEMS").unwrap_or(default.max_batch_items),

            fetch_connect_timeout_secs: env_parse("FETCH_CONNECT_TIMEOUT_SECS")
                .unwrap_or(default.fetch_connect_timeout_secs),

            fetch_timeout_secs: env_parse("FETCH_TIMEOUT_SECS"),

            presign_default_validity_secs: env_parse("PRESIGN_DEFAULT_VALIDITY_SECS")
                .unwrap_or(default.presign_default_validity_secs),

            presign_max_validity_secs: env_parse("PRESIGN_MAX_VALIDITY_SECS")
                .unwrap_or(default.presign_max_validity_secs),

            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
                .unwrap_or(default.request_timeout_secs),
        }
    }

    /// Create config for development (fast retries, short fetch timeouts)
    pub fn development() -> Self {
        Self {
            concurrency_limit: 4,
            backoff_base_ms: 10,
            fetch_connect_timeout_secs: 5,
            fetch_timeout_secs: Some(30),
            ..Self::default()
        }
    }

    /// Create config for production (environment overrides on top of defaults)
    pub fn production() -> Self {
        let config = Self::from_env();
        // S3 SigV4 links cannot outlive 7 days
        let ceiling = 7 * 24 * 60 * 60;
        Self {
            presign_max_validity_secs: config.presign_max_validity_secs.min(ceiling),
            ..config
        }
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn fetch_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_connect_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_secs.map(Duration::from_secs)
    }

    pub fn presign_max_validity(&self) -> Duration {
        Duration::from_secs(self.presign_max_validity_secs)
    }

    pub fn presign_default_validity(&self) -> Duration {
        Duration::from_secs(self.presign_default_validity_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Object storage connection settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Region (default: "us-east-1")
    pub region: String,
    /// Custom endpoint, e.g. MinIO. Enables path-style addressing.
    pub endpoint_url: Option<String>,
    /// Base URL used to report object locations. Derived from bucket/region when unset.
    pub public_base_url: Option<String>,
}

impl StorageConfig {
    /// Load storage settings, failing when bucket or credentials are missing
    pub fn from_env() -> anyhow::Result<Self> {
        let required = |name: &str| {
            env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} must be set", name))
        };

        Ok(Self {
            bucket: required("FILE_UPLOAD_BUCKET")?,
            access_key_id: required("FILE_UPLOAD_KEY_ID")?,
            secret_access_key: required("FILE_UPLOAD_ACCESS_KEY")?,
            region: env::var("FILE_UPLOAD_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint_url: env::var("FILE_UPLOAD_ENDPOINT").ok(),
            public_base_url: env::var("FILE_UPLOAD_PUBLIC_BASE_URL").ok(),
        })
    }

    /// Base URL for object locations, trailing slash removed
    pub fn resolved_public_base_url(&self) -> String {
        if let Some(base) = &self.public_base_url {
            return base.trim_end_matches('/').to_string();
        }
        if let Some(endpoint) = &self.endpoint_url {
            return format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket);
        }
        if self.region == "us-east-1" {
            format!("https://{}.s3.amazonaws.com", self.bucket)
        } else {
            format!("https://{}.s3-{}.amazonaws.com", self.bucket, self.region)
        }
    }
}

/// Service-token authentication settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// JWT algorithm name (default: "HS256")
    pub jwt_algorithm: String,
    /// Expected `sub` claim of service tokens
    pub service_id: String,
}

impl AuthConfig {
    /// Returns `None` when no secret is configured, which disables authentication
    pub fn from_env() -> Option<Self> {
        let jwt_secret = env::var("API_JWT_SECRET_KEY")
            .ok()
            .filter(|v| !v.is_empty())?;

        Some(Self {
            jwt_secret,
            jwt_algorithm: env::var("API_JWT_ALGORITHM")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "HS256".to_string()),
            service_id: env::var("API_SERVICE_ID").unwrap_or_default(),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
