//! Object key derivation.
//!
//! Key format: `{tenant_id}/{user_id}/{product_id}/{directory}/{name}`, where
//! `directory` is a single segment and `name` may span several segments
//! (relative paths from archives). This layout is the only persisted contract
//! of the service.

use crate::models::TenancyContext;
use crate::services::error::UploadError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Last segment of the key
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Accepts a caller-supplied full key only when it lies inside the
    /// tenancy namespace and names a `{directory}/{name}` below it.
    pub fn parse_within(tenancy: &TenancyContext, raw: &str) -> Result<Self, UploadError> {
        let prefix = format!("{}/", tenancy.prefix());
        let rest = raw.trim().strip_prefix(&prefix).ok_or_else(|| {
            UploadError::InvalidKeyComponent(format!(
                "key '{}' is outside the namespace '{}'",
                raw, prefix
            ))
        })?;
        let (directory, name) = rest.split_once('/').ok_or_else(|| {
            UploadError::InvalidKeyComponent(format!("key '{}' has no object name", raw))
        })?;
        ObjectKeyBuilder::build(tenancy, directory, name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub struct ObjectKeyBuilder;

impl ObjectKeyBuilder {
    /// Builds `{tenant}/{user}/{product}/{directory}/{name}`.
    ///
    /// Traversal segments, absolute prefixes and empty components are
    /// rejected, never rewritten; callers normalize first if they mean to.
    pub fn build(
        tenancy: &TenancyContext,
        directory: &str,
        name: &str,
    ) -> Result<ObjectKey, UploadError> {
        let directory = validate_directory(directory)?;
        let name = validate_name(name)?;
        Ok(ObjectKey(format!(
            "{}/{}/{}/{}/{}",
            tenancy.tenant_id(),
            tenancy.user_id(),
            tenancy.product_id(),
            directory,
            name
        )))
    }

    /// Validates a directory on its own, before any name is known
    pub fn check_directory(directory: &str) -> Result<(), UploadError> {
        validate_directory(directory).map(|_| ())
    }
}

fn invalid(msg: String) -> UploadError {
    UploadError::InvalidKeyComponent(msg)
}

fn validate_directory(directory: &str) -> Result<&str, UploadError> {
    let trimmed = directory.trim();
    if is_absolute(trimmed) {
        return Err(invalid(format!("directory '{}' is absolute", directory)));
    }
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(invalid("directory must not be empty".to_string()));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(invalid(format!(
            "directory '{}' must be a single segment",
            directory
        )));
    }
    check_segment(trimmed, directory)?;
    Ok(trimmed)
}

fn validate_name(name: &str) -> Result<String, UploadError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(invalid("name must not be empty".to_string()));
    }
    let normalized = trimmed.replace('\\', "/");
    if is_absolute(&normalized) {
        return Err(invalid(format!("name '{}' is absolute", name)));
    }
    for segment in normalized.split('/') {
        check_segment(segment, name)?;
    }
    Ok(normalized)
}

fn check_segment(segment: &str, original: &str) -> Result<(), UploadError> {
    match segment {
        "" => Err(invalid(format!("'{}' contains an empty segment", original))),
        "." | ".." => Err(invalid(format!(
            "'{}' contains a '{}' segment",
            original, segment
        ))),
        s if s.chars().any(char::is_control) => Err(invalid(format!(
            "'{}' contains control characters",
            original.escape_default()
        ))),
        _ => Ok(()),
    }
}

/// Leading separator or a Windows drive prefix such as `C:` or `C:\`.
/// A colon later in a segment (`a:b.txt`) is an ordinary character.
pub(crate) fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('\\') {
        return true;
    }
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(letter), Some(':'), None | Some('/') | Some('\\')) if letter.is_ascii_alphabetic()
    )
}
