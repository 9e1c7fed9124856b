//! Content-addressed blob cache: immutable bytes keyed by SHA-256, with
//! DB-side reference counting and a grace-window garbage sweep.

mod blob_store;
mod entries;
pub mod phash;

pub use blob_store::{BlobKind, BlobStore, StoredBlob};
pub use entries::{CacheEntry, CacheEntryRepository};
