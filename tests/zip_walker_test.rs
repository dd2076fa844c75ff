mod common;

use common::{reverse_central_directory, zip_bytes};
use object_upload_backend::services::error::UploadError;
use object_upload_backend::services::zip_walker::{ZipLimits, ZipWalker};
use std::io::Cursor;

fn limits() -> ZipLimits {
    ZipLimits {
        max_archive_size: 1024 * 1024,
        max_entries: 10,
    }
}

#[tokio::test]
async fn test_yields_files_in_archive_order() {
    let data = zip_bytes(&[
        ("a/", &b""[..]),
        ("a/b.txt", &b"bee"[..]),
        ("a/c/d.txt", &b"dee"[..]),
    ]);

    let walker = ZipWalker::open(Cursor::new(data), limits()).await.unwrap();
    assert_eq!(walker.len(), 2);

    let entries: Vec<_> = walker.entries().collect();
    assert_eq!(entries[0].relative_path(), "a/b.txt");
    assert_eq!(entries[1].relative_path(), "a/c/d.txt");
    assert_eq!(entries[1].declared_len(), 3);

    let mut bodies = Vec::new();
    for entry in entries {
        bodies.push(entry.read(1024).await.unwrap());
    }
    assert_eq!(&bodies[0][..], b"bee");
    assert_eq!(&bodies[1][..], b"dee");
}

#[tokio::test]
async fn test_physical_order_wins_over_directory_order() {
    let data = reverse_central_directory(zip_bytes(&[
        ("first.txt", &b"1"[..]),
        ("second.txt", &b"2"[..]),
        ("third.txt", &b"3"[..]),
    ]));

    let mut raw = zip::ZipArchive::new(Cursor::new(data.clone())).unwrap();
    assert_eq!(raw.by_index(0).unwrap().name(), "third.txt");

    let walker = ZipWalker::open(Cursor::new(data), limits()).await.unwrap();
    let paths: Vec<String> = walker
        .entries()
        .map(|e| e.relative_path().to_string())
        .collect();
    assert_eq!(paths, vec!["first.txt", "second.txt", "third.txt"]);
}

#[tokio::test]
async fn test_escaping_entry_rejects_whole_archive() {
    let data = zip_bytes(&[("ok.txt", &b"fine"[..]), ("../escape.txt", &b"nope"[..])]);

    let err = ZipWalker::open(Cursor::new(data), limits())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, UploadError::UnsafeArchiveEntry(_)), "{:?}", err);
}

#[tokio::test]
async fn test_not_a_zip() {
    let err = ZipWalker::open(Cursor::new(b"plain text, not an archive".to_vec()), limits())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, UploadError::InvalidArchive(_)), "{:?}", err);
}

#[tokio::test]
async fn test_entry_limit() {
    let names: Vec<String> = (0..12).map(|i| format!("f{}.txt", i)).collect();
    let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"x"[..])).collect();
    let data = zip_bytes(&entries);

    let err = ZipWalker::open(Cursor::new(data), limits())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, UploadError::ArchiveTooLarge(_)), "{:?}", err);
}

#[tokio::test]
async fn test_archive_size_limit() {
    let body = vec![7u8; 4096];
    let data = zip_bytes(&[("big.bin", body.as_slice())]);
    let small = ZipLimits {
        max_archive_size: 64,
        max_entries: 10,
    };

    let err = ZipWalker::open(Cursor::new(data), small)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, UploadError::ArchiveTooLarge(_)), "{:?}", err);
}

#[tokio::test]
async fn test_entry_read_respects_object_limit() {
    let body = vec![b'a'; 2048];
    let data = zip_bytes(&[("big.txt", body.as_slice())]);
    let walker = ZipWalker::open(Cursor::new(data), limits()).await.unwrap();

    let entry = walker.entries().next().unwrap();
    let err = entry.read(100).await.unwrap_err();
    assert!(matches!(err, UploadError::PayloadTooLarge { limit: 100 }));
}

#[tokio::test]
async fn test_empty_archive() {
    let data = zip_bytes(&[]);
    let walker = ZipWalker::open(Cursor::new(data), limits()).await.unwrap();
    assert!(walker.is_empty());
}
