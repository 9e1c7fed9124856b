//! File-backed, immutable blobs keyed by their SHA-256.
//!
//! Layout: `<root>/<kind>/<first-two-hex>/<full-hash><ext>`. Writes go
//! through a temp file in the target directory and rename into place, so
//! readers never observe partial content and concurrent writers of the same
//! hash are safe.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::{CoreError, ErrorKind, Result};

/// Top-level shard the blob lands in, derived from what the bytes are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobKind {
    Image,
    Video,
    Audio,
    Text,
}

impl BlobKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            BlobKind::Image => "images",
            BlobKind::Video => "videos",
            BlobKind::Audio => "audio",
            BlobKind::Text => "text",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "images" | "image" => Some(BlobKind::Image),
            "videos" | "video" => Some(BlobKind::Video),
            "audio" => Some(BlobKind::Audio),
            "text" => Some(BlobKind::Text),
            _ => None,
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Result of a `put`: the content hash plus where the blob lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub content_hash: String,
    pub path: PathBuf,
    pub size: u64,
    /// False when the blob already existed and the write was skipped.
    pub newly_written: bool,
}

/// The content-addressed store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// SHA-256 of `bytes`, lowercase hex.
    pub fn hash_bytes(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn validate_hash(hash: &str) -> Result<()> {
        let valid = hash.len() == 64
            && hash
                .as_bytes()
                .iter()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(())
        } else {
            Err(CoreError::invalid_input(format!(
                "invalid content hash: {hash}"
            )))
        }
    }

    /// On-disk location for a hash, without touching the filesystem.
    pub fn path_for(&self, hash: &str, kind: BlobKind, ext: &str) -> Result<PathBuf> {
        Self::validate_hash(hash)?;
        let shard = &hash[..2];
        let ext = ext.trim_start_matches('.');
        let file_name = if ext.is_empty() {
            hash.to_string()
        } else {
            format!("{hash}.{ext}")
        };
        Ok(self.root.join(kind.dir_name()).join(shard).join(file_name))
    }

    pub async fn exists(&self, hash: &str, kind: BlobKind, ext: &str) -> Result<bool> {
        let path = self.path_for(hash, kind, ext)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    /// Store `bytes`, computing the hash internally. Duplicate puts of the
    /// same bytes are idempotent and report `newly_written = false`.
    pub async fn put(&self, bytes: &[u8], kind: BlobKind, ext: &str) -> Result<StoredBlob> {
        let content_hash = Self::hash_bytes(bytes);
        let path = self.path_for(&content_hash, kind, ext)?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(StoredBlob {
                content_hash,
                path,
                size: bytes.len() as u64,
                newly_written: false,
            });
        }

        let dir = path
            .parent()
            .ok_or_else(|| CoreError::invalid_state("blob path has no parent"))?;
        tokio::fs::create_dir_all(dir).await.map_err(|err| {
            CoreError::new(
                ErrorKind::WriteFailed,
                format!("failed to create blob dir {dir:?}: {err}"),
            )
        })?;

        let tmp = dir.join(format!(
            ".tmp.{}-{}",
            Utc::now().timestamp_micros(),
            &content_hash[..8]
        ));
        let mut file = tokio::fs::File::create(&tmp).await.map_err(|err| {
            CoreError::new(
                ErrorKind::WriteFailed,
                format!("failed to create temp blob {tmp:?}: {err}"),
            )
        })?;
        file.write_all(bytes).await.map_err(|err| {
            CoreError::new(
                ErrorKind::WriteFailed,
                format!("failed to write temp blob {tmp:?}: {err}"),
            )
        })?;
        file.flush().await.map_err(|err| {
            CoreError::new(
                ErrorKind::WriteFailed,
                format!("failed to flush temp blob {tmp:?}: {err}"),
            )
        })?;
        drop(file);

        // If another writer won the race, discard our temp.
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Ok(StoredBlob {
                content_hash,
                path,
                size: bytes.len() as u64,
                newly_written: false,
            });
        }

        tokio::fs::rename(&tmp, &path).await.map_err(|err| {
            CoreError::new(
                ErrorKind::WriteFailed,
                format!("failed to move blob {tmp:?} -> {path:?}: {err}"),
            )
        })?;

        Ok(StoredBlob {
            content_hash,
            path,
            size: bytes.len() as u64,
            newly_written: true,
        })
    }

    /// Ingest an existing file (e.g. a finished download) by streaming its
    /// hash and renaming it into place. The source file is consumed.
    pub async fn put_file(&self, source: &Path, kind: BlobKind, ext: &str) -> Result<StoredBlob> {
        use tokio::io::AsyncReadExt;

        let mut file = tokio::fs::File::open(source).await.map_err(|err| {
            CoreError::new(
                ErrorKind::ReadFailed,
                format!("failed to open {source:?}: {err}"),
            )
        })?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let read = file.read(&mut buffer).await.map_err(|err| {
                CoreError::new(
                    ErrorKind::ReadFailed,
                    format!("failed to read {source:?}: {err}"),
                )
            })?;
            if read == 0 {
                break;
            }
            size += read as u64;
            hasher.update(&buffer[..read]);
        }
        drop(file);
        let content_hash = hex::encode(hasher.finalize());

        let path = self.path_for(&content_hash, kind, ext)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(source).await;
            return Ok(StoredBlob {
                content_hash,
                path,
                size,
                newly_written: false,
            });
        }
        let dir = path
            .parent()
            .ok_or_else(|| CoreError::invalid_state("blob path has no parent"))?;
        tokio::fs::create_dir_all(dir).await.map_err(|err| {
            CoreError::new(
                ErrorKind::WriteFailed,
                format!("failed to create blob dir {dir:?}: {err}"),
            )
        })?;
        tokio::fs::rename(source, &path).await.map_err(|err| {
            CoreError::new(
                ErrorKind::WriteFailed,
                format!("failed to move blob {source:?} -> {path:?}: {err}"),
            )
        })?;
        Ok(StoredBlob {
            content_hash,
            path,
            size,
            newly_written: true,
        })
    }

    /// Open a blob for reading.
    pub async fn read(&self, hash: &str, kind: BlobKind, ext: &str) -> Result<tokio::fs::File> {
        let path = self.path_for(hash, kind, ext)?;
        tokio::fs::File::open(&path).await.map_err(|err| {
            CoreError::new(
                ErrorKind::FileNotFound,
                format!("blob {hash} not present at {path:?}: {err}"),
            )
        })
    }

    /// Remove a blob from disk. Only the GC sweep calls this, after
    /// re-verifying the refcount inside a transaction.
    pub async fn unlink(&self, hash: &str, kind: BlobKind, ext: &str) -> Result<()> {
        let path = self.path_for(hash, kind, ext)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CoreError::new(
                ErrorKind::WriteFailed,
                format!("failed to unlink blob {path:?}: {err}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn put_is_content_addressed_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());

        let first = store.put(b"poster bytes", BlobKind::Image, "jpg").await.unwrap();
        assert!(first.newly_written);
        assert!(first.path.starts_with(dir.path().join("images")));
        assert_eq!(&first.content_hash[..2], first.path.parent().unwrap().file_name().unwrap().to_str().unwrap());

        let second = store.put(b"poster bytes", BlobKind::Image, "jpg").await.unwrap();
        assert!(!second.newly_written);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.path, second.path);
    }

    #[tokio::test]
    async fn read_returns_the_stored_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());

        let stored = store.put(b"<movie/>", BlobKind::Text, "nfo").await.unwrap();
        let mut file = store
            .read(&stored.content_hash, BlobKind::Text, "nfo")
            .await
            .unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"<movie/>");
    }

    #[tokio::test]
    async fn invalid_hashes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());
        assert!(store.path_for("not-a-hash", BlobKind::Image, "jpg").is_err());
        assert!(store
            .path_for(&"A".repeat(64), BlobKind::Image, "jpg")
            .is_err());
    }

    #[tokio::test]
    async fn unlink_is_a_no_op_for_missing_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());
        let hash = BlobStore::hash_bytes(b"never stored");
        store.unlink(&hash, BlobKind::Image, "jpg").await.unwrap();
    }
}
