//! Content-addressed store behavior, end to end against a real tempdir.

use cinedex_core::cache::{phash, BlobKind, BlobStore};
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn identical_bytes_land_at_one_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new(dir.path().to_path_buf());

    let first = store.put(b"identical artwork", BlobKind::Image, "jpg").await.unwrap();
    let second = store.put(b"identical artwork", BlobKind::Image, "jpg").await.unwrap();
    let third = store.put(b"different artwork", BlobKind::Image, "jpg").await.unwrap();

    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(first.path, second.path);
    assert!(first.newly_written);
    assert!(!second.newly_written);
    assert_ne!(first.content_hash, third.content_hash);

    // Layout: <root>/<kind>/<first-two-hex>/<hash>.<ext>
    let relative = first.path.strip_prefix(dir.path()).unwrap();
    let parts: Vec<_> = relative.components().collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].as_os_str(), "images");
    assert_eq!(
        parts[1].as_os_str().to_str().unwrap(),
        &first.content_hash[..2]
    );
    assert_eq!(
        parts[2].as_os_str().to_str().unwrap(),
        format!("{}.jpg", first.content_hash)
    );
}

#[tokio::test]
async fn file_ingest_matches_byte_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let store = BlobStore::new(dir.path().to_path_buf());

    let staging = dir.path().join("staging.mp4");
    tokio::fs::write(&staging, b"trailer bytes").await.unwrap();

    let from_file = store.put_file(&staging, BlobKind::Video, "mp4").await.unwrap();
    assert_eq!(from_file.content_hash, BlobStore::hash_bytes(b"trailer bytes"));
    assert!(!tokio::fs::try_exists(&staging).await.unwrap(), "staging consumed");

    let mut handle = store
        .read(&from_file.content_hash, BlobKind::Video, "mp4")
        .await
        .unwrap();
    let mut contents = Vec::new();
    handle.read_to_end(&mut contents).await.unwrap();
    assert_eq!(contents, b"trailer bytes");
}

#[test]
fn perceptual_similarity_is_reflexive_and_bounded() {
    for hash in [0u64, u64::MAX, 0xDEAD_BEEF_CAFE_F00D] {
        assert_eq!(phash::similarity(hash, hash), 1.0);
    }
    let sim = phash::similarity(0x0F0F, 0xF0F0);
    assert!((0.0..=1.0).contains(&sim));
}
