//! Video probing and downloading through the yt-dlp binary, plus the
//! oEmbed existence check used to confirm a video is truly gone before a
//! failure is classified permanent.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{DownloadedVideo, VerifyOutcome, VideoDownloader, VideoMetadataProvider, VideoProbe};
use crate::error::{CoreError, ErrorKind, Result};

/// How long one yt-dlp invocation may run before we give up on it.
const YTDLP_PROBE_TIMEOUT: Duration = Duration::from_secs(60);
const YTDLP_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Drives the yt-dlp binary as a subprocess.
#[derive(Debug, Clone)]
pub struct YtDlpClient {
    binary: PathBuf,
    verifier: OEmbedVerifier,
}

impl YtDlpClient {
    pub fn new(binary: PathBuf, http: reqwest::Client) -> Self {
        Self {
            binary,
            verifier: OEmbedVerifier::new(http),
        }
    }

    /// Classify a non-zero yt-dlp exit by its stderr text.
    fn classify_failure(stderr: &str) -> CoreError {
        let lowered = stderr.to_lowercase();
        if lowered.contains("429")
            || lowered.contains("rate limit")
            || lowered.contains("too many requests")
        {
            return CoreError::provider_rate_limit(
                "yt-dlp rate limited",
                Duration::from_secs(3600),
            );
        }
        if Self::is_gone(&lowered) {
            return CoreError::new(ErrorKind::NotFound, "video unavailable");
        }
        CoreError::new(ErrorKind::ProviderUnavailable, truncate(stderr, 500))
    }

    fn is_gone(lowered_stderr: &str) -> bool {
        lowered_stderr.contains("video unavailable")
            || lowered_stderr.contains("private video")
            || lowered_stderr.contains("has been removed")
            || lowered_stderr.contains("account associated with this video has been terminated")
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<std::process::Output> {
        let child = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                CoreError::new(
                    ErrorKind::Configuration,
                    format!("failed to spawn {:?}: {err}", self.binary),
                )
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(CoreError::new(
                ErrorKind::ProviderUnavailable,
                format!("yt-dlp did not finish: {err}"),
            )),
            Err(_) => Err(CoreError::timeout("yt-dlp timed out")),
        }
    }
}

#[async_trait]
impl VideoMetadataProvider for YtDlpClient {
    async fn probe(&self, url: &str) -> Result<Option<VideoProbe>> {
        let output = self
            .run(
                &["--dump-single-json", "--no-download", "--no-warnings", url],
                YTDLP_PROBE_TIMEOUT,
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if Self::is_gone(&stderr.to_lowercase()) {
                debug!(url, "probe reports video gone");
                return Ok(None);
            }
            return Err(Self::classify_failure(&stderr));
        }

        let info: ProbeJson = serde_json::from_slice(&output.stdout)
            .map_err(|err| CoreError::provider_invalid(format!("yt-dlp json: {err}")))?;

        let (best_width, best_height) = info
            .formats
            .iter()
            .filter_map(|format| Some((format.width?, format.height?)))
            .max_by_key(|(_, height)| *height)
            .map(|(width, height)| (Some(width), Some(height)))
            .unwrap_or((info.width, info.height));

        Ok(Some(VideoProbe {
            best_width,
            best_height,
            duration: info.duration.map(|duration| duration as i32),
            thumbnail: info.thumbnail,
            format_count: info.formats.len(),
        }))
    }
}

#[async_trait]
impl VideoDownloader for YtDlpClient {
    async fn download(
        &self,
        url: &str,
        out_path: &Path,
        max_height: i32,
    ) -> Result<DownloadedVideo> {
        let format = format!("bv*[height<={max_height}]+ba/b[height<={max_height}]/b");
        let out = out_path
            .to_str()
            .ok_or_else(|| CoreError::invalid_input("non-utf8 output path"))?;
        let output = self
            .run(
                &[
                    "--no-warnings",
                    "--no-playlist",
                    "-f",
                    &format,
                    "--merge-output-format",
                    "mp4",
                    "-o",
                    out,
                    url,
                ],
                YTDLP_DOWNLOAD_TIMEOUT,
            )
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(url, stderr = %truncate(&stderr, 200), "trailer download failed");
            return Err(Self::classify_failure(&stderr));
        }

        let metadata = tokio::fs::metadata(out_path).await.map_err(|err| {
            CoreError::new(
                ErrorKind::WriteFailed,
                format!("downloaded file missing at {out_path:?}: {err}"),
            )
        })?;
        Ok(DownloadedVideo {
            size: metadata.len(),
        })
    }

    async fn verify(&self, url: &str) -> Result<VerifyOutcome> {
        self.verifier.verify(url).await
    }
}

/// Confirms video existence through the hosting site's oEmbed endpoint.
#[derive(Debug, Clone)]
pub struct OEmbedVerifier {
    http: reqwest::Client,
}

impl OEmbedVerifier {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn oembed_endpoint(url: &str) -> Option<String> {
        if url.contains("youtube.com") || url.contains("youtu.be") {
            Some(format!(
                "https://www.youtube.com/oembed?url={url}&format=json"
            ))
        } else if url.contains("vimeo.com") {
            Some(format!("https://vimeo.com/api/oembed.json?url={url}"))
        } else {
            None
        }
    }

    pub async fn verify(&self, url: &str) -> Result<VerifyOutcome> {
        let Some(endpoint) = Self::oembed_endpoint(url) else {
            return Ok(VerifyOutcome::Unknown);
        };
        let response = self
            .http
            .get(&endpoint)
            .timeout(Duration::from_secs(15))
            .send()
            .await;
        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                Ok(match status {
                    200 => VerifyOutcome::Exists,
                    // YouTube answers 400/401/403/404 for gone or private.
                    400 | 401 | 403 | 404 => VerifyOutcome::NotFound,
                    _ => VerifyOutcome::Unknown,
                })
            }
            Err(err) => {
                debug!(url, error = %err, "oEmbed check inconclusive");
                Ok(VerifyOutcome::Unknown)
            }
        }
    }
}

fn truncate(raw: &str, max: usize) -> String {
    if raw.len() <= max {
        raw.to_string()
    } else {
        let mut end = max;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &raw[..end])
    }
}

#[derive(Debug, Deserialize)]
struct ProbeJson {
    width: Option<i32>,
    height: Option<i32>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<FormatJson>,
}

#[derive(Debug, Deserialize)]
struct FormatJson {
    width: Option<i32>,
    height: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_classification_separates_rate_limits_from_gone_videos() {
        let rate_limited = YtDlpClient::classify_failure("HTTP Error 429: Too Many Requests");
        assert_eq!(rate_limited.kind, ErrorKind::ProviderRateLimit);
        assert_eq!(rate_limited.retry_after, Some(Duration::from_secs(3600)));

        let gone = YtDlpClient::classify_failure("ERROR: Video unavailable");
        assert_eq!(gone.kind, ErrorKind::NotFound);

        let transient = YtDlpClient::classify_failure("ERROR: unable to connect");
        assert_eq!(transient.kind, ErrorKind::ProviderUnavailable);
        assert!(transient.is_retryable());
    }

    #[test]
    fn gone_detection_covers_private_and_removed() {
        assert!(YtDlpClient::is_gone("error: private video"));
        assert!(YtDlpClient::is_gone("this video has been removed by the uploader"));
        assert!(!YtDlpClient::is_gone("error: network unreachable"));
    }

    #[test]
    fn oembed_endpoints_cover_known_sites() {
        assert!(OEmbedVerifier::oembed_endpoint("https://www.youtube.com/watch?v=x")
            .unwrap()
            .contains("youtube.com/oembed"));
        assert!(OEmbedVerifier::oembed_endpoint("https://vimeo.com/123")
            .unwrap()
            .contains("vimeo.com/api/oembed"));
        assert!(OEmbedVerifier::oembed_endpoint("https://example.com/v").is_none());
    }

    #[test]
    fn probe_json_takes_the_tallest_format() {
        let info: ProbeJson = serde_json::from_value(serde_json::json!({
            "width": 640,
            "height": 360,
            "duration": 150.2,
            "thumbnail": "https://i.ytimg.com/t.jpg",
            "formats": [
                {"width": 1280, "height": 720},
                {"width": 1920, "height": 1080},
                {"width": null, "height": null}
            ]
        }))
        .unwrap();
        let (width, height) = info
            .formats
            .iter()
            .filter_map(|format| Some((format.width?, format.height?)))
            .max_by_key(|(_, height)| *height)
            .unwrap();
        assert_eq!((width, height), (1920, 1080));
    }
}
