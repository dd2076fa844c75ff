use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use object_upload_backend::config::{AuthConfig, StorageConfig, UploadConfig};
use object_upload_backend::infrastructure::storage;
use object_upload_backend::{AppState, create_app};
use std::net::SocketAddr;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StorageBackend {
    /// S3 or an S3-compatible endpoint configured through FILE_UPLOAD_*
    S3,
    /// Process-local map, for development
    Memory,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Storage backend to upload into
    #[arg(short, long, value_enum, default_value_t = StorageBackend::S3)]
    storage: StorageBackend,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Use development presets (short timeouts, fast retries)
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "object_upload_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Object Upload Backend [Storage: {:?}]...", args.storage);

    let upload_config = if args.dev {
        UploadConfig::development()
    } else {
        UploadConfig::production()
    };
    info!(
        "🛡️  Upload Config: Concurrency={}, Attempts={}, Max Object={}MB, Max Archive={}MB",
        upload_config.concurrency_limit,
        upload_config.max_attempts,
        upload_config.max_object_size / 1024 / 1024,
        upload_config.max_archive_size / 1024 / 1024
    );

    let storage_client = match args.storage {
        StorageBackend::S3 => storage::setup_s3_storage(&StorageConfig::from_env()?).await,
        StorageBackend::Memory => storage::setup_memory_storage(),
    };

    let auth = AuthConfig::from_env();
    match &auth {
        Some(auth) => info!("🔐 Service token auth enabled (service: {})", auth.service_id),
        None => warn!("⚠️  API_JWT_SECRET_KEY not set, upload routes are unauthenticated"),
    }

    let state = AppState::new(storage_client, upload_config, auth)?;

    let app = create_app(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            })
            .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                info!("📥 {} {}", request.method(), request.uri());
            })
            .on_response(
                |response: &axum::http::Response<_>,
                 latency: std::time::Duration,
                 _span: &tracing::Span| {
                    info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                },
            ),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
