use crate::config::UploadConfig;
use crate::models::{BatchResult, BatchStatus, UploadOutcome};
use crate::services::content::{ContentSource, UploadItem, read_payload, resolve_content_type};
use crate::services::error::UploadError;
use crate::services::fetcher::RemoteFetcher;
use crate::services::storage::StorageClient;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use rand::Rng;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub concurrency_limit: usize,
    pub retry: RetryPolicy,
    pub max_object_size: u64,
}

impl From<&UploadConfig> for OrchestratorConfig {
    fn from(config: &UploadConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit.max(1),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                base_delay: config.backoff_base(),
            },
            max_object_size: config.max_object_size,
        }
    }
}

/// Exponential backoff with jitter, applied only to retryable errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure: `base * 2^(attempt-1)` plus up to
    /// half of that again as jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let backoff = self.base_delay.saturating_mul(1 << exponent);
        let jitter_ms = (backoff.as_millis() as u64) / 2;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        backoff + Duration::from_millis(jitter)
    }

    /// Runs `op` until it succeeds, fails permanently or runs out of attempts.
    /// Returns the final result with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> (Result<T, UploadError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "🔁 {} failed (attempt {}/{}), retrying in {:?}: {}",
                        label, attempt, self.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

/// Detaches instead of aborting on drop, so uploads already in flight still
/// complete when the caller goes away
struct Workers(JoinSet<(usize, UploadOutcome)>);

impl Drop for Workers {
    fn drop(&mut self) {
        self.0.detach_all();
    }
}

struct Stored {
    size: u64,
    content_type: String,
    location: String,
}

impl Stored {
    fn into_outcome(self, key: String, attempts: u32) -> UploadOutcome {
        UploadOutcome::succeeded(key, self.size, self.content_type, self.location, attempts)
    }
}

struct Materialized {
    body: Bytes,
    /// Caller override carried by the source itself
    override_type: Option<String>,
    /// Type reported by the origin (multipart part header, HTTP response)
    reported_type: Option<String>,
}

/// Drives a batch of uploads through a bounded worker pool.
///
/// Outcomes come back in input order and one item's failure never affects
/// its siblings. Uploading the same batch twice writes the same keys again;
/// whether that overwrites is up to the backend (S3 overwrites).
#[derive(Clone)]
pub struct UploadOrchestrator {
    storage: Arc<dyn StorageClient>,
    fetcher: RemoteFetcher,
    config: OrchestratorConfig,
}

impl UploadOrchestrator {
    pub fn new(
        storage: Arc<dyn StorageClient>,
        fetcher: RemoteFetcher,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            storage,
            fetcher,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageClient> {
        &self.storage
    }

    pub fn fetcher(&self) -> &RemoteFetcher {
        &self.fetcher
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn run(&self, items: Vec<UploadItem>, cancel: &CancellationToken) -> BatchResult {
        self.run_stream(futures::stream::iter(items), cancel).await
    }

    /// Like `run`, for items produced lazily (archive entries, URL lists).
    ///
    /// Once `cancel` fires no further item is dispatched; in-flight uploads
    /// finish and every item not yet started is reported `Cancelled`.
    pub async fn run_stream<S>(&self, items: S, cancel: &CancellationToken) -> BatchResult
    where
        S: Stream<Item = UploadItem>,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));
        let mut workers = Workers(JoinSet::new());
        let mut keys: Vec<String> = Vec::new();
        let mut slots: Vec<Option<UploadOutcome>> = Vec::new();
        let mut items = pin!(items);

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = items.next() => match next {
                    Some(item) => item,
                    None => break,
                },
            };

            let position = slots.len();
            keys.push(item.key.to_string());
            slots.push(None);

            let worker = self.clone();
            workers.0.spawn(async move {
                let _permit = permit;
                (position, worker.process(item).await)
            });
        }

        // Anything the producer still holds was never dispatched
        if cancel.is_cancelled() {
            while let Some(item) = items.next().await {
                let key = item.key.to_string();
                keys.push(key.clone());
                slots.push(Some(UploadOutcome::cancelled(key)));
            }
        }

        while let Some(joined) = workers.0.join_next().await {
            match joined {
                Ok((position, outcome)) => slots[position] = Some(outcome),
                Err(e) => error!("Upload worker aborted: {}", e),
            }
        }

        let outcomes: Vec<UploadOutcome> = slots
            .into_iter()
            .zip(keys)
            .map(|(slot, key)| {
                slot.unwrap_or_else(|| {
                    UploadOutcome::failed(
                        key,
                        &UploadError::SourceRead("upload worker aborted".to_string()),
                        0,
                    )
                })
            })
            .collect();

        let result = BatchResult::from_outcomes(outcomes);
        let summary = format!(
            "{} items, {} succeeded, {} failed, {} cancelled (concurrency {})",
            result.items.len(),
            result.succeeded,
            result.failed,
            result.cancelled,
            self.config.concurrency_limit
        );
        match result.status {
            BatchStatus::Succeeded => info!("✅ Batch finished: {}", summary),
            BatchStatus::PartialFailure => warn!("⚠️  Batch partially failed: {}", summary),
            BatchStatus::TotalFailure => warn!("❌ Batch failed: {}", summary),
        }
        result
    }

    /// Uploads a single item through the same pipeline as a batch, surfacing
    /// the terminal error instead of folding it into an outcome
    pub async fn upload_one(
        &self,
        item: UploadItem,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let (key, stored, attempts) = self.execute(item).await;
        stored.map(|stored| stored.into_outcome(key, attempts))
    }

    async fn process(&self, item: UploadItem) -> UploadOutcome {
        let (key, stored, attempts) = self.execute(item).await;
        match stored {
            Ok(stored) => stored.into_outcome(key, attempts),
            Err(e) => UploadOutcome::failed(key, &e, attempts),
        }
    }

    async fn execute(&self, item: UploadItem) -> (String, Result<Stored, UploadError>, u32) {
        let UploadItem {
            key,
            source,
            content_type,
        } = item;
        let description = source.describe();

        let (materialized, fetch_attempts) = self.materialize(source).await;
        let materialized = match materialized {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to read {} for {}: {}", description, key, e);
                return (key.into_string(), Err(e), fetch_attempts);
            }
        };

        let explicit = content_type.or(materialized.override_type);
        let resolved_type = resolve_content_type(
            explicit.as_deref(),
            key.file_name(),
            &materialized.body,
            materialized.reported_type.as_deref(),
        );

        let storage = &self.storage;
        let key_ref = &key;
        let type_ref = resolved_type.as_str();
        let body = materialized.body;
        let label = format!("put {}", key);
        let (stored, attempts) = self
            .config
            .retry
            .run(&label, move || storage.put(key_ref, body.clone(), type_ref))
            .await;

        let stored = match stored {
            Ok(size) => {
                tracing::debug!("Stored {} ({} bytes, {})", key, size, resolved_type);
                Ok(Stored {
                    size,
                    location: self.storage.object_url(&key),
                    content_type: resolved_type,
                })
            }
            Err(e) => {
                warn!("Upload of {} failed after {} attempt(s): {}", key, attempts, e);
                Err(e)
            }
        };
        (key.into_string(), stored, attempts)
    }

    /// Produces the body of a source. Remote fetches are retried; local and
    /// archive sources are read once.
    async fn materialize(&self, source: ContentSource) -> (Result<Materialized, UploadError>, u32) {
        let limit = self.config.max_object_size;
        match source {
            ContentSource::LocalPayload {
                reader,
                declared_len,
                content_type,
                reported_type,
            } => {
                let result = read_payload(reader, declared_len, limit)
                    .await
                    .map(|body| Materialized {
                        body,
                        override_type: content_type,
                        reported_type,
                    });
                (result, 1)
            }
            ContentSource::RemoteUrl { url, content_type } => {
                let fetcher = &self.fetcher;
                let url_ref = &url;
                let label = format!("fetch {}", url);
                let (fetched, attempts) = self
                    .config
                    .retry
                    .run(&label, move || async move {
                        let remote = fetcher.fetch(url_ref).await?;
                        if remote.content_length.is_some_and(|len| len > limit) {
                            return Err(UploadError::PayloadTooLarge { limit });
                        }
                        let reported = remote.content_type.clone();
                        let body = remote.bytes().await?;
                        if body.len() as u64 > limit {
                            return Err(UploadError::PayloadTooLarge { limit });
                        }
                        Ok((body, reported))
                    })
                    .await;
                let result = fetched.map(|(body, reported_type)| Materialized {
                    body,
                    override_type: content_type,
                    reported_type,
                });
                (result, attempts)
            }
            ContentSource::ZipEntry(entry) => {
                let result = entry.read(limit).await.map(|body| Materialized {
                    body,
                    override_type: None,
                    reported_type: None,
                });
                (result, 1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        let first = policy.delay_for(1);
        let third = policy.delay_for(3);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));
    }

    #[test]
    fn test_backoff_zero_base() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(4), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::ZERO,
        };
        let mut calls = 0;
        let (result, attempts) = policy
            .run("op", || {
                calls += 1;
                async { Err::<(), _>(UploadError::StoragePermanent("denied".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retry_bounded_by_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        };
        let (result, attempts) = policy
            .run("op", || async {
                Err::<(), _>(UploadError::StorageTransient("503".into()))
            })
            .await;
        assert_eq!(result, Err(UploadError::StorageTransient("503".into())));
        assert_eq!(attempts, 3);
    }
}
