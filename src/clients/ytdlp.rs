//! Audio download via a `yt-dlp` subprocess.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

static HOSTILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("invalid regex"));
static WHITESPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("invalid regex"));

/// Strip filesystem-hostile characters and collapse whitespace runs.
pub fn sanitize(value: &str) -> String {
    let value = HOSTILE_CHARS.replace_all(value.trim(), "");
    WHITESPACE_RUNS.replace_all(&value, " ").into_owned()
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to spawn yt-dlp: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("yt-dlp failed: {0}")]
    CommandFailed(String),
    #[error("yt-dlp finished successfully but output file not found")]
    MissingOutput,
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub track_id: i64,
    pub artist: String,
    pub title: String,
    pub youtube_code: String,
}

#[derive(Debug, Clone)]
pub struct DownloadedAudio {
    pub file_path: PathBuf,
    pub audio_format: String,
}

/// Fetches track audio into the import directory.
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    async fn fetch(&self, request: &DownloadRequest) -> Result<DownloadedAudio>;
}

/// `yt-dlp` based fetcher.
pub struct YtdlpFetcher {
    import_dir: PathBuf,
    music_dir: PathBuf,
    audio_format: String,
}

impl YtdlpFetcher {
    pub fn new(import_dir: PathBuf, music_dir: PathBuf, audio_format: String) -> Self {
        Self {
            import_dir,
            music_dir,
            audio_format,
        }
    }

    fn output_template(&self, request: &DownloadRequest) -> Result<PathBuf> {
        let artist_dir = self.import_dir.join(sanitize(&request.artist));
        std::fs::create_dir_all(&artist_dir)?;
        Ok(artist_dir.join(format!(
            "{} - {}.%(ext)s",
            request.track_id,
            sanitize(&request.title)
        )))
    }

    /// Look for an existing file under the music library root: a matching
    /// artist directory (case-insensitive) containing a file whose name
    /// contains the title.
    fn find_in_library(&self, artist: &str, title: &str) -> Option<PathBuf> {
        let artist_lower = artist.to_lowercase();
        let title_lower = title.to_lowercase();

        let entries = std::fs::read_dir(&self.music_dir).ok()?;
        let artist_dir = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.is_dir()
                    && p.file_name()
                        .map(|n| n.to_string_lossy().to_lowercase() == artist_lower)
                        .unwrap_or(false)
            })?;

        find_file_containing(&artist_dir, &title_lower)
    }
}

fn find_file_containing(dir: &Path, needle_lower: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file_containing(&path, needle_lower) {
                return Some(found);
            }
        } else if path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase().contains(needle_lower))
            .unwrap_or(false)
        {
            return Some(path);
        }
    }
    None
}

#[async_trait]
impl AudioFetcher for YtdlpFetcher {
    async fn fetch(&self, request: &DownloadRequest) -> Result<DownloadedAudio> {
        if let Some(existing) = self.find_in_library(&request.artist, &request.title) {
            info!(
                "Track {} already in library: {:?}",
                request.track_id, existing
            );
            return Ok(DownloadedAudio {
                file_path: existing,
                audio_format: self.audio_format.clone(),
            });
        }

        let url = format!("https://music.youtube.com/watch?v={}", request.youtube_code);
        let output_template = self.output_template(request)?;

        info!(
            "Downloading track {}: {} - {}",
            request.track_id, request.artist, request.title
        );
        let mut command = Command::new("yt-dlp");
        command
            .arg("-x")
            .arg("--audio-format")
            .arg(&self.audio_format)
            .arg("--audio-quality")
            .arg("0")
            .arg("--embed-metadata")
            .arg("--embed-thumbnail")
            .arg("--no-playlist")
            .arg("-o")
            .arg(&output_template)
            .arg(&url);
        debug!("yt-dlp command: {:?}", command);

        let output = command.output().await.map_err(FetchError::Spawn)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(FetchError::CommandFailed(stderr).into());
        }

        let final_path = PathBuf::from(
            output_template
                .to_string_lossy()
                .replace("%(ext)s", &self.audio_format),
        );
        if !final_path.exists() {
            return Err(FetchError::MissingOutput.into());
        }

        info!("Download complete: {:?}", final_path);
        Ok(DownloadedAudio {
            file_path: final_path,
            audio_format: self.audio_format.clone(),
        })
    }
}
