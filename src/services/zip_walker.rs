//! Single-pass ZIP extraction.
//!
//! The archive is staged to a temporary file, its central directory is read
//! once, and every record is validated before the first entry is handed out.
//! Entry bodies are decompressed on the blocking pool when consumed.

use crate::config::UploadConfig;
use crate::services::error::UploadError;
use crate::services::keys::is_absolute;
use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use zip::ZipArchive;

#[derive(Debug, Clone, Copy)]
pub struct ZipLimits {
    /// Staged archive ceiling in bytes
    pub max_archive_size: u64,
    /// Ceiling on records in the central directory, directories included
    pub max_entries: usize,
}

impl From<&UploadConfig> for ZipLimits {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_archive_size: config.max_archive_size,
            max_entries: config.max_archive_entries,
        }
    }
}

struct StagedArchive {
    archive: Mutex<ZipArchive<File>>,
    // Keeps the temp file alive until the last entry is dropped
    _file: NamedTempFile,
}

#[derive(Debug)]
struct Record {
    index: usize,
    path: String,
    size: u64,
    offset: u64,
}

pub struct ZipWalker {
    staged: Arc<StagedArchive>,
    records: Vec<Record>,
}

impl ZipWalker {
    /// Stages `reader` to disk and validates the whole central directory.
    ///
    /// Fails with `ArchiveTooLarge`, `InvalidArchive` or `UnsafeArchiveEntry`
    /// before any entry becomes visible.
    pub async fn open<R>(mut reader: R, limits: ZipLimits) -> Result<Self, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let staged = NamedTempFile::new()
            .map_err(|e| UploadError::SourceRead(format!("Failed to create temp file: {}", e)))?;
        let mut file = tokio::fs::File::from_std(
            staged
                .reopen()
                .map_err(|e| UploadError::SourceRead(e.to_string()))?,
        );

        let mut buffer = vec![0u8; 64 * 1024];
        let mut total: u64 = 0;
        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(UploadError::from_io)?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > limits.max_archive_size {
                return Err(UploadError::ArchiveTooLarge(format!(
                    "archive exceeds {} bytes",
                    limits.max_archive_size
                )));
            }
            file.write_all(&buffer[..n])
                .await
                .map_err(|e| UploadError::SourceRead(e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| UploadError::SourceRead(e.to_string()))?;
        drop(file);

        tracing::debug!("Staged archive: {} bytes at {:?}", total, staged.path());

        tokio::task::spawn_blocking(move || Self::index(staged, limits))
            .await
            .map_err(|e| UploadError::SourceRead(format!("Archive indexing task failed: {}", e)))?
    }

    fn index(staged: NamedTempFile, limits: ZipLimits) -> Result<Self, UploadError> {
        let handle = staged
            .reopen()
            .map_err(|e| UploadError::SourceRead(e.to_string()))?;
        let mut archive =
            ZipArchive::new(handle).map_err(|e| UploadError::InvalidArchive(e.to_string()))?;

        if archive.len() > limits.max_entries {
            return Err(UploadError::ArchiveTooLarge(format!(
                "{} records exceed the limit of {}",
                archive.len(),
                limits.max_entries
            )));
        }

        let mut records = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive
                .by_index_raw(index)
                .map_err(|e| UploadError::InvalidArchive(e.to_string()))?;
            let raw_name = file.name().to_string();
            let path = normalize_entry_path(&raw_name)?;

            if file.is_dir() || raw_name.ends_with('\\') {
                continue;
            }
            if path.is_empty() {
                return Err(UploadError::UnsafeArchiveEntry(raw_name));
            }
            records.push(Record {
                index,
                path,
                size: file.size(),
                offset: file.header_start(),
            });
        }
        records.sort_by_key(|r| r.offset);

        Ok(Self {
            staged: Arc::new(StagedArchive {
                archive: Mutex::new(archive),
                _file: staged,
            }),
            records,
        })
    }

    /// Number of file entries that will be yielded
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the walker; entries come out in physical archive order
    pub fn entries(self) -> ZipEntries {
        ZipEntries {
            staged: self.staged,
            records: self.records.into_iter(),
        }
    }
}

pub struct ZipEntries {
    staged: Arc<StagedArchive>,
    records: std::vec::IntoIter<Record>,
}

impl Iterator for ZipEntries {
    type Item = ZipEntry;

    fn next(&mut self) -> Option<ZipEntry> {
        let record = self.records.next()?;
        Some(ZipEntry {
            relative_path: record.path,
            declared_len: record.size,
            index: record.index,
            staged: Arc::clone(&self.staged),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for ZipEntries {}

/// One file inside a validated archive. Bytes stay compressed until `read`.
pub struct ZipEntry {
    relative_path: String,
    declared_len: u64,
    index: usize,
    staged: Arc<StagedArchive>,
}

impl fmt::Debug for ZipEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipEntry")
            .field("relative_path", &self.relative_path)
            .field("declared_len", &self.declared_len)
            .finish()
    }
}

impl ZipEntry {
    /// Normalized, forward-slash path relative to the archive root
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Uncompressed size recorded in the central directory
    pub fn declared_len(&self) -> u64 {
        self.declared_len
    }

    /// Decompresses the entry, refusing to produce more than `limit` bytes
    pub async fn read(self, limit: u64) -> Result<Bytes, UploadError> {
        if self.declared_len > limit {
            return Err(UploadError::PayloadTooLarge { limit });
        }

        tokio::task::spawn_blocking(move || {
            let mut archive = self
                .staged
                .archive
                .lock()
                .map_err(|_| UploadError::SourceRead("archive handle poisoned".to_string()))?;
            let file = archive
                .by_index(self.index)
                .map_err(|e| UploadError::InvalidArchive(e.to_string()))?;

            // The header size is attacker-controlled, so cap the read as well
            let mut buffer = Vec::with_capacity(self.declared_len.min(limit) as usize);
            file.take(limit + 1)
                .read_to_end(&mut buffer)
                .map_err(|e| {
                    UploadError::SourceRead(format!("{}: {}", self.relative_path, e))
                })?;
            if buffer.len() as u64 > limit {
                return Err(UploadError::PayloadTooLarge { limit });
            }
            Ok(Bytes::from(buffer))
        })
        .await
        .map_err(|e| UploadError::SourceRead(format!("Decompression task failed: {}", e)))?
    }
}

/// Resolves `.`/`..` and backslashes, failing when the result would leave the
/// archive root or names an absolute path.
pub fn normalize_entry_path(raw: &str) -> Result<String, UploadError> {
    let unified = raw.replace('\\', "/");
    if is_absolute(&unified) {
        return Err(UploadError::UnsafeArchiveEntry(raw.to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(UploadError::UnsafeArchiveEntry(raw.to_string()));
                }
            }
            s if s.chars().any(char::is_control) => {
                return Err(UploadError::UnsafeArchiveEntry(raw.escape_default().to_string()));
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_paths() {
        assert_eq!(normalize_entry_path("a/b.txt").unwrap(), "a/b.txt");
        assert_eq!(normalize_entry_path("a\\c\\d.txt").unwrap(), "a/c/d.txt");
        assert_eq!(normalize_entry_path("./a//b/./c.txt").unwrap(), "a/b/c.txt");
        assert_eq!(normalize_entry_path("a/x/../b.txt").unwrap(), "a/b.txt");
        assert_eq!(normalize_entry_path("a/").unwrap(), "a");
        assert_eq!(normalize_entry_path("a:b.txt").unwrap(), "a:b.txt");
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        for raw in [
            "../escape.txt",
            "a/../../escape.txt",
            "/etc/passwd",
            "\\windows\\system32",
            "C:/boot.ini",
            "C:\\boot.ini",
            "a/\u{0}b",
        ] {
            assert!(
                matches!(
                    normalize_entry_path(raw),
                    Err(UploadError::UnsafeArchiveEntry(_))
                ),
                "{} should be rejected",
                raw
            );
        }
    }
}
