//! Library scanning: walk the directory tree, classify files, upsert
//! movies, and chain enrichment work.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use cinedex_model::{AssetKind, ExternalIds, Library, NormalizedImage, ProviderName};

use crate::db::{AssetRepository, MovieRepository, NewMovie};
use crate::error::Result;
use crate::queue::{JobPayload, JobPriority, JobQueue, Shutdown};

/// Media container extensions recognized as movie files.
static MEDIA_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "mkv", "mp4", "avi", "mov", "wmv", "m4v", "mpg", "mpeg", "ts", "webm",
    ]
    .into_iter()
    .collect()
});

static IMAGE_EXTENSIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["jpg", "jpeg", "png", "webp", "tbn"].into_iter().collect());

static SUBTITLE_EXTENSIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["srt", "sub", "ass", "ssa", "vtt"].into_iter().collect());

/// Canonical artwork suffixes, matched against lowercase stems.
static ARTWORK_PATTERNS: Lazy<Vec<(AssetKind, Regex)>> = Lazy::new(|| {
    [
        (AssetKind::Poster, r"-poster(\d+)?$|^poster$|^folder$|^cover$"),
        (AssetKind::Fanart, r"-fanart(\d+)?$|^fanart$|^backdrop$"),
        (AssetKind::Banner, r"-banner(\d+)?$|^banner$"),
        (AssetKind::Clearlogo, r"-clearlogo(\d+)?$|^clearlogo$|^logo$"),
        (AssetKind::Clearart, r"-clearart(\d+)?$|^clearart$"),
        (AssetKind::Discart, r"-disc(\d+)?$|^disc$"),
        (AssetKind::Landscape, r"-landscape(\d+)?$|^landscape$"),
        (AssetKind::Characterart, r"-characterart(\d+)?$"),
        (AssetKind::Thumb, r"-thumb(\d+)?$|^thumb$"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("artwork pattern")))
    .collect()
});

/// Trailing "Title (2010)" style year marker in file or folder names.
static TITLE_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<title>.+?)[ ._]*\((?P<year>(19|20)\d{2})\)").expect("title"));

/// What one file in the tree is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileClass {
    Media,
    Sidecar,
    Artwork(AssetKind),
    Subtitle,
    Trailer,
    Other,
}

/// Classify a file by extension plus name pattern.
pub fn classify_file(path: &Path) -> FileClass {
    let Some(ext) = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
    else {
        return FileClass::Other;
    };
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_ascii_lowercase())
        .unwrap_or_default();

    if MEDIA_EXTENSIONS.contains(ext.as_str()) {
        if stem.ends_with("-trailer") {
            return FileClass::Trailer;
        }
        return FileClass::Media;
    }
    if ext == "nfo" {
        return FileClass::Sidecar;
    }
    if IMAGE_EXTENSIONS.contains(ext.as_str()) {
        for (kind, pattern) in ARTWORK_PATTERNS.iter() {
            if pattern.is_match(&stem) {
                return FileClass::Artwork(*kind);
            }
        }
        return FileClass::Other;
    }
    if SUBTITLE_EXTENSIONS.contains(ext.as_str()) {
        return FileClass::Subtitle;
    }
    FileClass::Other
}

/// Title and year hints parsed from a file or folder name.
pub fn parse_title_hints(name: &str) -> (Option<String>, Option<i32>) {
    if let Some(captures) = TITLE_YEAR.captures(name) {
        let title = captures
            .name("title")
            .map(|m| m.as_str().replace(['.', '_'], " ").trim().to_string());
        let year = captures
            .name("year")
            .and_then(|m| m.as_str().parse::<i32>().ok());
        return (title.filter(|t| !t.is_empty()), year);
    }
    let cleaned = name.replace(['.', '_'], " ").trim().to_string();
    ((!cleaned.is_empty()).then_some(cleaned), None)
}

/// Outcome of scanning one library or folder.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub files_seen: usize,
    pub movies_created: usize,
    pub movies_updated: usize,
    pub local_assets_found: usize,
    pub enrich_enqueued: usize,
}

/// Walks library directories and upserts what it finds.
#[derive(Debug, Clone)]
pub struct Scanner {
    movies: MovieRepository,
    assets: AssetRepository,
    queue: JobQueue,
}

impl Scanner {
    pub fn new(movies: MovieRepository, assets: AssetRepository, queue: JobQueue) -> Self {
        Self {
            movies,
            assets,
            queue,
        }
    }

    /// Scan a whole library tree.
    pub async fn scan_library(
        &self,
        library: &Library,
        chain_priority: JobPriority,
        shutdown: &Shutdown,
    ) -> Result<ScanReport> {
        self.scan_folder(library, &library.root_path, None, chain_priority, shutdown)
            .await
    }

    /// Scan one folder (recursively). `seed_ids` carries external ids a
    /// webhook supplied for the movie expected in this folder. Chained
    /// enrichment runs at `chain_priority`, matching the scan job's own.
    pub async fn scan_folder(
        &self,
        library: &Library,
        root: &Path,
        seed_ids: Option<&ExternalIds>,
        chain_priority: JobPriority,
        shutdown: &Shutdown,
    ) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut pending: VecDeque<PathBuf> = VecDeque::from([root.to_path_buf()]);
        let mut media_files: Vec<PathBuf> = Vec::new();
        let mut sidecars: HashSet<PathBuf> = HashSet::new();
        let mut artwork: Vec<(PathBuf, AssetKind)> = Vec::new();

        while let Some(dir) = pending.pop_front() {
            if shutdown.is_cancelled() {
                return Err(shutdown.interruption());
            }
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "unreadable directory skipped");
                    continue;
                }
            };
            while let Some(entry) = entries.next_entry().await.map_err(crate::error::CoreError::from)? {
                let path = entry.path();
                let file_name = entry.file_name();
                let name = file_name.to_string_lossy();
                if name.starts_with('.') {
                    continue;
                }
                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(_) => continue,
                };
                if file_type.is_dir() {
                    pending.push_back(path);
                    continue;
                }
                report.files_seen += 1;
                match classify_file(&path) {
                    FileClass::Media => media_files.push(path),
                    FileClass::Sidecar => {
                        sidecars.insert(path);
                    }
                    FileClass::Artwork(kind) => artwork.push((path, kind)),
                    FileClass::Trailer | FileClass::Subtitle | FileClass::Other => {}
                }
            }
        }

        for media_path in media_files {
            if shutdown.is_cancelled() {
                return Err(shutdown.interruption());
            }
            let (title_hint, year_hint) = media_title_hints(&media_path);
            let upsert = self
                .movies
                .upsert_scanned(&NewMovie {
                    library_id: library.id,
                    file_path: media_path.to_string_lossy().into_owned(),
                    title_hint,
                    year_hint,
                    external_ids: seed_ids.cloned().unwrap_or_default(),
                })
                .await?;

            if upsert.created {
                report.movies_created += 1;
                info!(movie_id = %upsert.movie.id, path = %media_path.display(), "movie discovered");
            } else {
                report.movies_updated += 1;
            }
            let movie = &upsert.movie;

            // Ingest a sibling sidecar once.
            let nfo_path = media_path.with_extension("nfo");
            if sidecars.contains(&nfo_path) && movie.nfo_parsed_at.is_none() {
                self.movies.set_nfo_parsed(movie.id, Utc::now()).await?;
            }

            // Local artwork in the movie's directory becomes candidates,
            // unless the user already rejected the path.
            if let Some(movie_dir) = media_path.parent() {
                for (artwork_path, kind) in artwork
                    .iter()
                    .filter(|(path, _)| path.parent() == Some(movie_dir))
                {
                    let path_str = artwork_path.to_string_lossy();
                    if self.assets.is_rejected(movie.id, &path_str).await? {
                        debug!(path = %path_str, "rejected asset skipped");
                        continue;
                    }
                    self.assets
                        .upsert_from_image(
                            movie.id,
                            &NormalizedImage {
                                provider: ProviderName::from(ProviderName::LOCAL),
                                provider_image_id: path_str.clone().into_owned(),
                                kind: *kind,
                                url: format!("file://{path_str}"),
                                width: None,
                                height: None,
                                language: None,
                                vote_count: None,
                                likes: None,
                            },
                            false,
                        )
                        .await?;
                    report.local_assets_found += 1;
                }
            }

            // Chain enrichment when the library wants it.
            if library.auto_enrich {
                let enqueued = self
                    .queue
                    .enqueue_unless_active(
                        &JobPayload::EnrichMetadata {
                            movie_id: movie.id,
                            manual: false,
                            force_refresh: false,
                        },
                        chain_priority,
                        3,
                    )
                    .await?;
                if enqueued.is_some() {
                    report.enrich_enqueued += 1;
                }
            }
        }

        info!(
            library_id = %library.id,
            files = report.files_seen,
            created = report.movies_created,
            "scan finished"
        );
        Ok(report)
    }
}

fn media_title_hints(path: &Path) -> (Option<String>, Option<i32>) {
    // Prefer the folder name; release folders carry cleaner titles than
    // media filenames.
    if let Some(folder) = path.parent().and_then(|dir| dir.file_name()).and_then(|n| n.to_str()) {
        let (title, year) = parse_title_hints(folder);
        if year.is_some() {
            return (title, year);
        }
    }
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    parse_title_hints(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_by_extension_and_pattern() {
        assert_eq!(classify_file(Path::new("/m/Inception.mkv")), FileClass::Media);
        assert_eq!(
            classify_file(Path::new("/m/Inception-trailer.mp4")),
            FileClass::Trailer
        );
        assert_eq!(
            classify_file(Path::new("/m/Inception.nfo")),
            FileClass::Sidecar
        );
        assert_eq!(
            classify_file(Path::new("/m/Inception-poster.jpg")),
            FileClass::Artwork(AssetKind::Poster)
        );
        assert_eq!(
            classify_file(Path::new("/m/Inception-fanart2.jpg")),
            FileClass::Artwork(AssetKind::Fanart)
        );
        assert_eq!(
            classify_file(Path::new("/m/folder.jpg")),
            FileClass::Artwork(AssetKind::Poster)
        );
        assert_eq!(
            classify_file(Path::new("/m/Inception.en.srt")),
            FileClass::Subtitle
        );
        assert_eq!(
            classify_file(Path::new("/m/random.jpg")),
            FileClass::Other
        );
        assert_eq!(classify_file(Path::new("/m/notes.txt")), FileClass::Other);
    }

    #[test]
    fn title_hints_parse_year_markers() {
        assert_eq!(
            parse_title_hints("Inception (2010)"),
            (Some("Inception".into()), Some(2010))
        );
        assert_eq!(
            parse_title_hints("The.Matrix.(1999).1080p"),
            (Some("The Matrix".into()), Some(1999))
        );
        assert_eq!(parse_title_hints("Inception"), (Some("Inception".into()), None));
    }

    #[test]
    fn folder_year_beats_file_stem() {
        let (title, year) = media_title_hints(Path::new("/media/m/Inception (2010)/inception.720p.mkv"));
        assert_eq!(title.as_deref(), Some("Inception"));
        assert_eq!(year, Some(2010));
    }
}
