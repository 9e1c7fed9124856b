//! The publisher: deploys selected assets and the NFO sidecar into the
//! library directory under canonical names, atomically and idempotently.

mod naming;
mod nfo;

pub use naming::{sanitize_basename, suffix_for};
pub use nfo::{render_movie_nfo, NfoInput};

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use cinedex_model::{AssetCandidate, AssetKind, Movie, RelationKind, TrailerCandidate};

use crate::cache::{BlobKind, BlobStore, CacheEntryRepository};
use crate::cache::phash;
use crate::db::{AssetRepository, MovieRepository, RelationRepository, TrailerRepository};
use crate::error::{CoreError, ErrorKind, Result};
use crate::providers::{VerifyOutcome, VideoDownloader};

/// Which artifact families one publish run deploys.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub publish_assets: bool,
    pub publish_actors: bool,
    pub publish_trailers: bool,
    pub generate_nfo: bool,
    /// Height cap handed to the trailer downloader.
    pub max_trailer_height: i32,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            publish_assets: true,
            publish_actors: true,
            publish_trailers: true,
            generate_nfo: true,
            max_trailer_height: 1080,
        }
    }
}

/// Outcome of one publish run. Per-asset failures accumulate instead of
/// aborting the run; an NFO failure is tracked separately.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub assets_published: usize,
    pub actors_published: usize,
    pub nfo_generated: bool,
    pub nfo_hash: Option<String>,
    pub errors: Vec<String>,
    pub nfo_error: Option<String>,
}

impl PublishReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty() && self.nfo_error.is_none()
    }
}

/// Deploys cached blobs and the generated sidecar for one movie.
pub struct Publisher {
    movies: MovieRepository,
    relations: RelationRepository,
    assets: AssetRepository,
    trailers: TrailerRepository,
    blob_store: BlobStore,
    cache_entries: CacheEntryRepository,
    downloader: Arc<dyn VideoDownloader>,
    http: reqwest::Client,
    config: PublishConfig,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .finish()
    }
}

impl Publisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        movies: MovieRepository,
        relations: RelationRepository,
        assets: AssetRepository,
        trailers: TrailerRepository,
        blob_store: BlobStore,
        cache_entries: CacheEntryRepository,
        downloader: Arc<dyn VideoDownloader>,
        http: reqwest::Client,
        config: PublishConfig,
    ) -> Self {
        Self {
            movies,
            relations,
            assets,
            trailers,
            blob_store,
            cache_entries,
            downloader,
            http,
            config,
        }
    }

    /// Publish one movie into its library directory.
    pub async fn publish(&self, movie: &Movie) -> Result<PublishReport> {
        let mut report = PublishReport::default();

        let deploy_dir = movie
            .deploy_dir()
            .ok_or_else(|| CoreError::invalid_state("movie file path has no directory"))?
            .to_path_buf();
        let basename = sanitize_basename(
            movie
                .media_basename()
                .ok_or_else(|| CoreError::invalid_state("movie file path has no basename"))?,
        );

        if self.config.publish_assets {
            let selected = self.assets.all_selected(movie.id).await?;
            for candidate in &selected {
                if !candidate.kind.is_image() {
                    continue;
                }
                match self
                    .publish_one_asset(movie, candidate, &deploy_dir, &basename)
                    .await
                {
                    Ok(true) => report.assets_published += 1,
                    Ok(false) => {}
                    Err(err) => {
                        warn!(
                            movie_id = %movie.id,
                            kind = %candidate.kind,
                            error = %err,
                            "asset deploy failed"
                        );
                        report
                            .errors
                            .push(format!("{}: {err}", candidate.kind));
                    }
                }
            }
        }

        if self.config.publish_trailers {
            match self.publish_trailer(movie, &deploy_dir, &basename).await {
                Ok(true) => report.assets_published += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(movie_id = %movie.id, error = %err, "trailer deploy failed");
                    report.errors.push(format!("trailer: {err}"));
                }
            }
        }

        if self.config.publish_actors {
            match self.publish_actor_images(movie, &deploy_dir).await {
                Ok(count) => report.actors_published = count,
                Err(err) => report.errors.push(format!("actors: {err}")),
            }
        }

        if self.config.generate_nfo {
            match self.publish_nfo(movie, &deploy_dir, &basename).await {
                Ok(hash) => {
                    report.nfo_generated = true;
                    report.nfo_hash = Some(hash);
                }
                Err(err) => {
                    warn!(movie_id = %movie.id, error = %err, "nfo deploy failed");
                    report.nfo_error = Some(err.to_string());
                }
            }
        }

        if report.success() {
            self.movies
                .mark_published(movie.id, report.nfo_hash.as_deref())
                .await?;
            info!(
                movie_id = %movie.id,
                assets = report.assets_published,
                actors = report.actors_published,
                "publish complete"
            );
        }

        Ok(report)
    }

    /// Deploy one selected candidate. Returns false when the target was
    /// already identical (idempotent no-op) or the kind has no canonical
    /// suffix.
    async fn publish_one_asset(
        &self,
        movie: &Movie,
        candidate: &AssetCandidate,
        deploy_dir: &Path,
        basename: &str,
    ) -> Result<bool> {
        let rank = candidate.rank.unwrap_or(1);
        let Some(suffix) = suffix_for(candidate.kind, rank) else {
            warn!(kind = %candidate.kind, "no canonical suffix for asset kind, skipping");
            return Ok(false);
        };

        // Make sure the bytes are in the cache.
        let content_hash = match &candidate.content_hash {
            Some(hash) => hash.clone(),
            None => self.download_image(candidate).await?,
        };

        let entry = self
            .cache_entries
            .get(&content_hash)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("cache entry {content_hash}")))?;
        let blob_kind = entry
            .blob_kind()
            .ok_or_else(|| CoreError::invalid_state(format!("bad cache kind {}", entry.kind)))?;
        let source = self
            .blob_store
            .path_for(&content_hash, blob_kind, &entry.extension)?;

        let ext = if entry.extension.is_empty() {
            default_extension(candidate.kind).to_string()
        } else {
            entry.extension.clone()
        };
        let target = deploy_dir.join(format!("{basename}{suffix}.{ext}"));

        if file_matches_hash(&target, &content_hash).await {
            debug!(target = %target.display(), "asset already current");
            return Ok(false);
        }

        atomic_copy(&source, &target).await?;
        Ok(true)
    }

    async fn download_image(&self, candidate: &AssetCandidate) -> Result<String> {
        let response = self.http.get(&candidate.provider_url).send().await?;
        if !response.status().is_success() {
            return Err(CoreError::provider_server(
                format!("image fetch returned {}", response.status()),
                response.status().as_u16(),
            ));
        }
        let bytes = response.bytes().await?;
        let ext = extension_from_url(&candidate.provider_url).unwrap_or("jpg");
        let stored = self.blob_store.put(&bytes, BlobKind::Image, ext).await?;
        self.cache_entries
            .upsert_and_ref(
                &stored.content_hash,
                &stored.path.to_string_lossy(),
                stored.size as i64,
                BlobKind::Image,
                ext,
            )
            .await?;
        let perceptual = phash::hash_bytes(&bytes).ok();
        self.assets
            .set_content_hash(candidate.id, &stored.content_hash, perceptual.map(|h| h as i64))
            .await?;
        Ok(stored.content_hash)
    }

    /// Deploy the selected trailer, downloading it into the cache first when
    /// needed. Returns false when nothing is selected or the target is
    /// already current.
    async fn publish_trailer(
        &self,
        movie: &Movie,
        deploy_dir: &Path,
        basename: &str,
    ) -> Result<bool> {
        let Some(trailer) = self.trailers.selected(movie.id).await? else {
            return Ok(false);
        };
        let content_hash = match &trailer.content_hash {
            Some(hash) => hash.clone(),
            None => self.download_trailer(&trailer).await?,
        };
        let source = self
            .blob_store
            .path_for(&content_hash, BlobKind::Video, "mp4")?;
        let suffix = suffix_for(AssetKind::Trailer, 1).expect("trailer suffix");
        let target = deploy_dir.join(format!("{basename}{suffix}.mp4"));
        if file_matches_hash(&target, &content_hash).await {
            return Ok(false);
        }
        atomic_copy(&source, &target).await?;
        Ok(true)
    }

    /// Download the selected trailer through the downloader capability.
    /// A failed download is only treated as permanent after the oEmbed
    /// verifier confirms the video is gone.
    async fn download_trailer(&self, trailer: &TrailerCandidate) -> Result<String> {
        let staging = self.blob_store.root().join(format!(
            ".trailer-download.{}.mp4",
            Utc::now().timestamp_micros()
        ));
        let download = self
            .downloader
            .download(&trailer.url, &staging, self.config.max_trailer_height)
            .await;

        if let Err(err) = download {
            let _ = tokio::fs::remove_file(&staging).await;
            if err.kind == ErrorKind::NotFound {
                // Confirm before declaring the trailer permanently gone.
                match self.downloader.verify(&trailer.url).await? {
                    VerifyOutcome::NotFound => {
                        return Err(CoreError::not_found("trailer confirmed unavailable"))
                    }
                    VerifyOutcome::Exists | VerifyOutcome::Unknown => {
                        return Err(CoreError::new(
                            ErrorKind::ProviderUnavailable,
                            "trailer download failed but video still exists",
                        ))
                    }
                }
            }
            return Err(err);
        }

        let stored = self
            .blob_store
            .put_file(&staging, BlobKind::Video, "mp4")
            .await?;
        self.cache_entries
            .upsert_and_ref(
                &stored.content_hash,
                &stored.path.to_string_lossy(),
                stored.size as i64,
                BlobKind::Video,
                "mp4",
            )
            .await?;
        self.trailers
            .set_content_hash(trailer.id, &stored.content_hash)
            .await?;
        Ok(stored.content_hash)
    }

    /// Rebuild `.actors/` from the current cast. The directory is removed
    /// first so dropped actors disappear from disk.
    async fn publish_actor_images(&self, movie: &Movie, deploy_dir: &Path) -> Result<usize> {
        let cast = self.relations.cast_for(movie.id).await?;
        let actors_dir = deploy_dir.join(".actors");

        if tokio::fs::try_exists(&actors_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&actors_dir).await.map_err(|err| {
                CoreError::new(
                    ErrorKind::WriteFailed,
                    format!("failed to clear {actors_dir:?}: {err}"),
                )
            })?;
        }
        if cast.iter().all(|member| member.thumb_url.is_none()) {
            return Ok(0);
        }
        tokio::fs::create_dir_all(&actors_dir).await.map_err(|err| {
            CoreError::new(
                ErrorKind::WriteFailed,
                format!("failed to create {actors_dir:?}: {err}"),
            )
        })?;

        let mut published = 0usize;
        for member in &cast {
            let Some(thumb_url) = member.thumb_url.as_deref() else {
                continue;
            };
            let bytes = match self.fetch_actor_image(thumb_url).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    debug!(actor = %member.name, error = %err, "actor image fetch failed");
                    continue;
                }
            };
            let target = actors_dir.join(format!("{}.jpg", sanitize_basename(&member.name)));
            write_atomic(&target, &bytes).await?;
            published += 1;
        }
        Ok(published)
    }

    async fn fetch_actor_image(&self, url: &str) -> Result<Vec<u8>> {
        // Served from cache when a previous publish already fetched it.
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CoreError::provider_server(
                format!("actor image returned {}", response.status()),
                response.status().as_u16(),
            ));
        }
        let bytes = response.bytes().await?.to_vec();
        let stored = self.blob_store.put(&bytes, BlobKind::Image, "jpg").await?;
        if stored.newly_written {
            self.cache_entries
                .record_unreferenced(
                    &stored.content_hash,
                    &stored.path.to_string_lossy(),
                    stored.size as i64,
                    BlobKind::Image,
                    "jpg",
                )
                .await?;
        }
        Ok(bytes)
    }

    /// Generate the sidecar, cache it, and deploy it. Returns the hash.
    async fn publish_nfo(
        &self,
        movie: &Movie,
        deploy_dir: &Path,
        basename: &str,
    ) -> Result<String> {
        let input = NfoInput {
            genres: self.relations.names_for(movie.id, RelationKind::Genre).await?,
            cast: self.relations.cast_for(movie.id).await?,
            directors: self
                .relations
                .names_for(movie.id, RelationKind::Director)
                .await?,
            writers: self.relations.names_for(movie.id, RelationKind::Writer).await?,
            studios: self.relations.names_for(movie.id, RelationKind::Studio).await?,
        };
        let xml = render_movie_nfo(movie, &input)?;
        let bytes = xml.as_bytes();

        let stored = self.blob_store.put(bytes, BlobKind::Text, "nfo").await?;

        // Keep the refcount at exactly one sidecar reference per movie.
        if movie.published_nfo_hash.as_deref() != Some(stored.content_hash.as_str()) {
            self.cache_entries
                .upsert_and_ref(
                    &stored.content_hash,
                    &stored.path.to_string_lossy(),
                    stored.size as i64,
                    BlobKind::Text,
                    "nfo",
                )
                .await?;
            if let Some(previous) = movie.published_nfo_hash.as_deref() {
                if let Err(err) = self.cache_entries.ref_dec(previous).await {
                    debug!(previous, error = %err, "previous sidecar entry already gone");
                }
            }
        }

        let target = deploy_dir.join(format!("{basename}.nfo"));
        if !file_matches_hash(&target, &stored.content_hash).await {
            write_atomic(&target, bytes).await?;
        }
        Ok(stored.content_hash)
    }
}

fn default_extension(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Trailer => "mp4",
        AssetKind::Subtitle => "srt",
        _ => "jpg",
    }
}

fn extension_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let ext = path.rsplit('.').next()?;
    match ext {
        "jpg" | "jpeg" | "png" | "webp" | "tbn" => Some(ext),
        _ => None,
    }
}

/// Whether the file at `path` exists with exactly this SHA-256.
async fn file_matches_hash(path: &Path, content_hash: &str) -> bool {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return false;
    };
    hex::encode(Sha256::digest(&bytes)) == content_hash
}

/// Copy via a temp file in the target directory plus rename.
async fn atomic_copy(source: &Path, target: &Path) -> Result<()> {
    let bytes = tokio::fs::read(source).await.map_err(|err| {
        CoreError::new(
            ErrorKind::ReadFailed,
            format!("failed to read {source:?}: {err}"),
        )
    })?;
    write_atomic(target, &bytes).await
}

async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| CoreError::invalid_state("deploy target has no directory"))?;
    tokio::fs::create_dir_all(dir).await.map_err(|err| {
        CoreError::new(
            ErrorKind::WriteFailed,
            format!("failed to create {dir:?}: {err}"),
        )
    })?;
    let tmp = dir.join(format!(".tmp.{}", Utc::now().timestamp_micros()));
    let mut file = tokio::fs::File::create(&tmp).await.map_err(|err| {
        CoreError::new(
            ErrorKind::WriteFailed,
            format!("failed to create {tmp:?}: {err}"),
        )
    })?;
    file.write_all(bytes).await.map_err(|err| {
        CoreError::new(
            ErrorKind::WriteFailed,
            format!("failed to write {tmp:?}: {err}"),
        )
    })?;
    file.flush().await.map_err(|err| {
        CoreError::new(
            ErrorKind::WriteFailed,
            format!("failed to flush {tmp:?}: {err}"),
        )
    })?;
    drop(file);
    tokio::fs::rename(&tmp, target).await.map_err(|err| {
        CoreError::new(
            ErrorKind::WriteFailed,
            format!("failed to move {tmp:?} -> {target:?}: {err}"),
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_extensions_are_recognized() {
        assert_eq!(extension_from_url("https://x/img.jpg"), Some("jpg"));
        assert_eq!(extension_from_url("https://x/img.png?size=big"), Some("png"));
        assert_eq!(extension_from_url("https://x/watch?v=abc"), None);
    }

    #[tokio::test]
    async fn atomic_write_then_hash_match() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("movie.nfo");
        write_atomic(&target, b"<movie/>").await.unwrap();
        let hash = hex::encode(Sha256::digest(b"<movie/>"));
        assert!(file_matches_hash(&target, &hash).await);
        assert!(!file_matches_hash(&target, &hex::encode(Sha256::digest(b"x"))).await);
    }
}
