use crate::config::UploadConfig;
use crate::models::PresignedLink;
use crate::services::content::{ContentSource, UploadItem};
use crate::services::error::UploadError;
use crate::services::keys::ObjectKey;
use crate::services::orchestrator::UploadOrchestrator;
use chrono::{TimeDelta, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// What a link should point at
pub enum PresignSource {
    /// Object already in storage
    Key(ObjectKey),
    /// Remote content, uploaded under `key` before the link is issued
    Url {
        url: Url,
        key: ObjectKey,
        content_type: Option<String>,
    },
}

#[derive(Clone)]
pub struct PresignedLinkIssuer {
    orchestrator: UploadOrchestrator,
    default_validity: Duration,
    max_validity: Duration,
}

impl PresignedLinkIssuer {
    pub fn new(
        orchestrator: UploadOrchestrator,
        default_validity: Duration,
        max_validity: Duration,
    ) -> Self {
        let max_validity = max_validity.max(Duration::from_secs(1));
        Self {
            orchestrator,
            default_validity: default_validity.min(max_validity),
            max_validity,
        }
    }

    pub fn from_config(orchestrator: UploadOrchestrator, config: &UploadConfig) -> Self {
        Self::new(
            orchestrator,
            config.presign_default_validity(),
            config.presign_max_validity(),
        )
    }

    pub fn max_validity(&self) -> Duration {
        self.max_validity
    }

    /// Validity actually granted for a request, and whether it was adjusted.
    /// Out-of-range values are clamped into `[1s, max]`, never rejected.
    pub fn clamp(&self, requested: Duration) -> (Duration, bool) {
        let secs = requested.as_secs();
        if secs == 0 {
            (Duration::from_secs(1), true)
        } else if requested > self.max_validity {
            (self.max_validity, true)
        } else {
            (Duration::from_secs(secs), false)
        }
    }

    /// Signs a GET link for `key`; `None` uses the configured default validity
    pub async fn issue(
        &self,
        key: &ObjectKey,
        validity: Option<Duration>,
    ) -> Result<PresignedLink, UploadError> {
        let requested = validity.unwrap_or(self.default_validity);
        let (granted, clamped) = self.clamp(requested);
        if clamped {
            tracing::debug!(
                "Presign validity for {} clamped from {}s to {}s",
                key,
                requested.as_secs(),
                granted.as_secs()
            );
        }

        let issued_at = Utc::now();
        let expires_at = i64::try_from(granted.as_secs())
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|validity| issued_at.checked_add_signed(validity))
            .ok_or_else(|| {
                UploadError::InvalidPresignValidity(format!(
                    "{}s cannot be represented as an expiry time",
                    granted.as_secs()
                ))
            })?;
        let url = self.orchestrator.storage().presign(key, granted).await?;

        Ok(PresignedLink {
            key: key.to_string(),
            url,
            issued_at,
            expires_at,
            requested_validity_secs: requested.as_secs(),
            granted_validity_secs: granted.as_secs(),
            clamped,
        })
    }

    /// For a URL source the content is uploaded first, then the stored key is
    /// signed. The two steps never overlap.
    pub async fn issue_for_source(
        &self,
        source: PresignSource,
        validity: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<PresignedLink, UploadError> {
        let key = match source {
            PresignSource::Key(key) => key,
            PresignSource::Url {
                url,
                key,
                content_type,
            } => {
                let item = UploadItem::new(
                    key.clone(),
                    ContentSource::RemoteUrl {
                        url,
                        content_type: None,
                    },
                )
                .with_content_type(content_type);

                self.orchestrator.upload_one(item, cancel).await?;
                key
            }
        };
        self.issue(&key, validity).await
    }
}
