use crate::config::UploadConfig;
use crate::models::{
    BatchResult, PresignedLink, ProductBatch, ProductBatchResult, TenancyContext, UploadOutcome,
};
use crate::services::content::{ContentSource, NamingPolicy, UploadItem};
use crate::services::error::UploadError;
use crate::services::fetcher::{RemoteFetcher, file_name_for};
use crate::services::keys::{ObjectKey, ObjectKeyBuilder};
use crate::services::orchestrator::UploadOrchestrator;
use crate::services::presign::{PresignSource, PresignedLinkIssuer};
use crate::services::zip_walker::{ZipLimits, ZipWalker};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use url::Url;

/// In-memory file from a request body
pub struct NamedPayload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// One remote object to copy into storage
pub struct UrlUpload {
    pub url: String,
    pub file_name: Option<String>,
    /// `application/zip` (or `application/x-zip-compressed`) expands the
    /// archive and stores its entries instead of the archive itself
    pub content_type: Option<String>,
}

/// Files for one product of a multi-product upload
pub struct ProductPayloads {
    pub tenancy: TenancyContext,
    pub files: Vec<NamedPayload>,
}

/// Position of a URL manifest entry in the merged batch
enum UrlSlot {
    /// Next `n` outcomes of the orchestrator run
    Items(usize),
    /// Archive that could not be fetched or opened
    Failed(UploadOutcome),
}

/// Turns request manifests into upload items and runs them.
///
/// Every key is derived and every URL parsed before the first upload starts,
/// so a malformed manifest fails as a whole without touching storage.
pub struct UploadService {
    orchestrator: UploadOrchestrator,
    issuer: PresignedLinkIssuer,
    zip_limits: ZipLimits,
}

impl UploadService {
    pub fn new(
        orchestrator: UploadOrchestrator,
        issuer: PresignedLinkIssuer,
        config: &UploadConfig,
    ) -> Self {
        Self {
            orchestrator,
            issuer,
            zip_limits: ZipLimits::from(config),
        }
    }

    pub fn orchestrator(&self) -> &UploadOrchestrator {
        &self.orchestrator
    }

    pub fn issuer(&self) -> &PresignedLinkIssuer {
        &self.issuer
    }

    /// Derives the key of a single upload, so callers can reject a bad
    /// directory or name before reading the body
    pub fn single_key(
        &self,
        tenancy: &TenancyContext,
        directory: &str,
        file_name: &str,
        naming: NamingPolicy,
    ) -> Result<ObjectKey, UploadError> {
        derive_key(tenancy, directory, file_name, naming, Utc::now())
    }

    /// Single streamed file, errors surfaced directly
    pub async fn upload_single(
        &self,
        key: ObjectKey,
        source: ContentSource,
        content_type: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let item = UploadItem::new(key, source).with_content_type(content_type);
        self.orchestrator.upload_one(item, cancel).await
    }

    pub async fn upload_payloads(
        &self,
        tenancy: &TenancyContext,
        directory: &str,
        files: Vec<NamedPayload>,
        naming: NamingPolicy,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, UploadError> {
        let items = payload_items(tenancy, directory, files, naming, Utc::now())?;
        Ok(self.orchestrator.run(items, cancel).await)
    }

    /// Uploads byte payloads for several products in one batch. Each product
    /// gets its own tenancy prefix; the worker pool is shared and outcomes
    /// are split back per product in request order.
    pub async fn upload_product_payloads(
        &self,
        directory: &str,
        products: Vec<ProductPayloads>,
        naming: NamingPolicy,
        cancel: &CancellationToken,
    ) -> Result<ProductBatchResult, UploadError> {
        let now = Utc::now();
        let mut items = Vec::new();
        let mut counts = Vec::with_capacity(products.len());
        let mut product_ids = Vec::with_capacity(products.len());
        for product in products {
            let product_items =
                payload_items(&product.tenancy, directory, product.files, naming, now)?;
            counts.push(product_items.len());
            product_ids.push(product.tenancy.product_id().to_string());
            items.extend(product_items);
        }
        tracing::info!(
            "📦 Uploading {} files for {} products",
            items.len(),
            product_ids.len()
        );

        let mut outcomes = self.orchestrator.run(items, cancel).await.items.into_iter();
        let batches = product_ids
            .into_iter()
            .zip(counts)
            .map(|(product_id, count)| ProductBatch {
                product_id,
                result: BatchResult::from_outcomes(outcomes.by_ref().take(count).collect()),
            })
            .collect();
        Ok(ProductBatchResult::from_batches(batches))
    }

    /// Copies remote objects into storage. ZIP-typed items are fetched and
    /// expanded in place: their entries take the item's position in the
    /// result, and an archive that cannot be opened yields one failed outcome
    /// under the key the archive itself would have had.
    pub async fn upload_urls(
        &self,
        tenancy: &TenancyContext,
        directory: &str,
        uploads: Vec<UrlUpload>,
        naming: NamingPolicy,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, UploadError> {
        let now = Utc::now();
        let mut parsed = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let url = RemoteFetcher::parse_url(&upload.url)?;
            let file_name = upload
                .file_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| file_name_for(&url, upload.content_type.as_deref()));
            let key = derive_key(tenancy, directory, &file_name, naming, now)?;
            parsed.push((url, key, upload.content_type));
        }

        let mut items = Vec::new();
        let mut slots = Vec::with_capacity(parsed.len());
        for (url, key, content_type) in parsed {
            if !content_type.as_deref().is_some_and(is_zip_type) {
                items.push(UploadItem::new(
                    key,
                    ContentSource::RemoteUrl { url, content_type },
                ));
                slots.push(UrlSlot::Items(1));
                continue;
            }

            if cancel.is_cancelled() {
                slots.push(UrlSlot::Failed(UploadOutcome::cancelled(key.into_string())));
                continue;
            }
            let (opened, attempts) = self.fetch_archive(&url).await;
            let entries = opened.and_then(|walker| {
                tracing::info!("📂 {} expanded to {} file entries", url, walker.len());
                walker
                    .entries()
                    .map(|entry| {
                        let entry_key =
                            derive_key(tenancy, directory, entry.relative_path(), naming, now)?;
                        Ok(UploadItem::new(entry_key, ContentSource::ZipEntry(entry)))
                    })
                    .collect::<Result<Vec<_>, UploadError>>()
            });
            match entries {
                Ok(entries) => {
                    slots.push(UrlSlot::Items(entries.len()));
                    items.extend(entries);
                }
                Err(e) => {
                    tracing::warn!("Archive {} could not be expanded: {}", url, e);
                    slots.push(UrlSlot::Failed(UploadOutcome::failed(
                        key.into_string(),
                        &e,
                        attempts,
                    )));
                }
            }
        }

        let mut uploaded = self.orchestrator.run(items, cancel).await.items.into_iter();
        let mut outcomes = Vec::new();
        for slot in slots {
            match slot {
                UrlSlot::Items(count) => outcomes.extend(uploaded.by_ref().take(count)),
                UrlSlot::Failed(outcome) => outcomes.push(outcome),
            }
        }
        Ok(BatchResult::from_outcomes(outcomes))
    }

    /// Extracts a ZIP stream and uploads every file entry under `directory`,
    /// keeping the archive's folder structure in the key.
    pub async fn upload_archive<R>(
        &self,
        tenancy: &TenancyContext,
        directory: &str,
        archive: R,
        naming: NamingPolicy,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        // Fail on a bad directory before staging anything
        ObjectKeyBuilder::check_directory(directory)?;

        let walker = ZipWalker::open(archive, self.zip_limits).await?;
        tracing::info!("📂 Archive opened: {} file entries", walker.len());
        self.upload_walker(tenancy, directory, walker, naming, cancel)
            .await
    }

    async fn upload_walker(
        &self,
        tenancy: &TenancyContext,
        directory: &str,
        walker: ZipWalker,
        naming: NamingPolicy,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, UploadError> {
        let now = Utc::now();
        let items = walker
            .entries()
            .map(|entry| {
                let key = derive_key(tenancy, directory, entry.relative_path(), naming, now)?;
                Ok(UploadItem::new(key, ContentSource::ZipEntry(entry)))
            })
            .collect::<Result<Vec<_>, UploadError>>()?;

        Ok(self
            .orchestrator
            .run_stream(futures::stream::iter(items), cancel)
            .await)
    }

    /// Downloads a ZIP and extracts it like `upload_archive`
    pub async fn upload_archive_from_url(
        &self,
        tenancy: &TenancyContext,
        directory: &str,
        url: &str,
        naming: NamingPolicy,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, UploadError> {
        let url = RemoteFetcher::parse_url(url)?;
        ObjectKeyBuilder::check_directory(directory)?;

        let (opened, _) = self.fetch_archive(&url).await;
        let walker = opened?;
        tracing::info!("📂 {} opened: {} file entries", url, walker.len());
        self.upload_walker(tenancy, directory, walker, naming, cancel)
            .await
    }

    /// Downloads a ZIP under the archive size limit and indexes it.
    /// Returns the fetch attempts made alongside the result.
    async fn fetch_archive(&self, url: &Url) -> (Result<ZipWalker, UploadError>, u32) {
        let fetcher = self
            .orchestrator
            .fetcher()
            .with_max_bytes(self.zip_limits.max_archive_size);
        let fetcher = &fetcher;
        let label = format!("fetch archive {}", url);
        let (fetched, attempts) = self
            .orchestrator
            .config()
            .retry
            .run(&label, move || fetcher.fetch(url))
            .await;
        let opened = match fetched {
            Ok(body) => ZipWalker::open(body.into_reader(), self.zip_limits).await,
            Err(e) => Err(e),
        };
        (opened.map_err(archive_limit), attempts)
    }

    pub async fn presign_key(
        &self,
        tenancy: &TenancyContext,
        key: &str,
        validity: Option<Duration>,
    ) -> Result<PresignedLink, UploadError> {
        let key = ObjectKey::parse_within(tenancy, key)?;
        self.issuer.issue(&key, validity).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn presign_url(
        &self,
        tenancy: &TenancyContext,
        directory: &str,
        url: &str,
        file_name: Option<String>,
        content_type: Option<String>,
        validity: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<PresignedLink, UploadError> {
        let url = RemoteFetcher::parse_url(url)?;
        let file_name = file_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| file_name_for(&url, content_type.as_deref()));
        let key = ObjectKeyBuilder::build(tenancy, directory, &file_name)?;

        self.issuer
            .issue_for_source(
                PresignSource::Url {
                    url,
                    key,
                    content_type,
                },
                validity,
                cancel,
            )
            .await
    }
}

fn payload_items(
    tenancy: &TenancyContext,
    directory: &str,
    files: Vec<NamedPayload>,
    naming: NamingPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<UploadItem>, UploadError> {
    files
        .into_iter()
        .map(|file| {
            let key = derive_key(tenancy, directory, &file.file_name, naming, now)?;
            let source = ContentSource::from_bytes(file.data, file.content_type);
            Ok(UploadItem::new(key, source))
        })
        .collect()
}

fn is_zip_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    essence.eq_ignore_ascii_case("application/zip")
        || essence.eq_ignore_ascii_case("application/x-zip-compressed")
}

fn derive_key(
    tenancy: &TenancyContext,
    directory: &str,
    name: &str,
    naming: NamingPolicy,
    now: DateTime<Utc>,
) -> Result<ObjectKey, UploadError> {
    ObjectKeyBuilder::build(tenancy, directory, &naming.apply(name, now))
}

/// A remote archive over the staging limit is reported like a local one
fn archive_limit(err: UploadError) -> UploadError {
    match err {
        UploadError::FetchSizeExceeded { url, limit } => {
            UploadError::ArchiveTooLarge(format!("{} exceeds {} bytes", url, limit))
        }
        other => other,
    }
}
