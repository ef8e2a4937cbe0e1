//! Configuration resolution: CLI arguments merged with an optional TOML
//! file, file values winning where both are present.

mod file_config;

pub use file_config::{
    ChatConfig, FileConfig, LastfmConfig, RelayConfig, TrackerConfig, WorkersConfig,
};

use crate::chat::GateStrategy;
use crate::enrichment::WorkerPoolSettings;
use crate::notify::RelayPolicy;
use crate::tracker::TrackerSettings;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LASTFM_BASE: &str = "http://ws.audioscrobbler.com/2.0";

/// CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub library_db: Option<PathBuf>,
    pub import_dir: Option<PathBuf>,
    pub music_dir: Option<PathBuf>,
    pub now_playing_url: Option<String>,
    pub chat_webhook_url: Option<String>,
    pub lastfm_api_key: Option<String>,
    pub ytmusic_url: Option<String>,
    pub audio_format: String,
}

/// Per-stage worker counts sharing one timing policy.
#[derive(Debug, Clone)]
pub struct WorkersSettings {
    pub genre_workers: usize,
    pub youtube_workers: usize,
    pub download_workers: usize,
    pub poll_interval: Duration,
    pub penalty_interval: Duration,
}

impl Default for WorkersSettings {
    fn default() -> Self {
        Self {
            genre_workers: 2,
            youtube_workers: 2,
            download_workers: 4,
            poll_interval: Duration::from_secs(5),
            penalty_interval: Duration::from_secs(2),
        }
    }
}

impl WorkersSettings {
    pub fn pool_settings(&self, workers: usize) -> WorkerPoolSettings {
        WorkerPoolSettings {
            workers,
            poll_interval: self.poll_interval,
            penalty_interval: self.penalty_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub strategy: GateStrategy,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            strategy: GateStrategy::Defer,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub library_db: PathBuf,
    pub import_dir: PathBuf,
    pub music_dir: PathBuf,
    pub now_playing_url: Option<String>,
    pub chat_webhook_url: Option<String>,
    pub lastfm_api_key: Option<String>,
    pub lastfm_base_url: String,
    pub ytmusic_url: Option<String>,
    pub audio_format: String,

    // Feature configs (with defaults)
    pub workers: WorkersSettings,
    pub tracker: TrackerSettings,
    pub relay: RelayPolicy,
    pub chat: ChatSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let library_db = file
            .library_db
            .map(PathBuf::from)
            .or_else(|| cli.library_db.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("library_db must be specified via CLI or in the config file")
            })?;
        if let Some(parent) = library_db.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                bail!("Library database directory does not exist: {:?}", parent);
            }
        }

        let import_dir = file
            .import_dir
            .map(PathBuf::from)
            .or_else(|| cli.import_dir.clone())
            .unwrap_or_else(|| PathBuf::from("/import"));
        let music_dir = file
            .music_dir
            .map(PathBuf::from)
            .or_else(|| cli.music_dir.clone())
            .unwrap_or_else(|| PathBuf::from("/music"));

        let now_playing_url = file
            .now_playing_url
            .or_else(|| cli.now_playing_url.clone());
        let chat_webhook_url = file
            .chat_webhook_url
            .or_else(|| cli.chat_webhook_url.clone());
        let ytmusic_url = file.ytmusic_url.or_else(|| cli.ytmusic_url.clone());
        let audio_format = file
            .audio_format
            .unwrap_or_else(|| cli.audio_format.clone());

        let lastfm_file = file.lastfm.unwrap_or_default();
        let lastfm_api_key = lastfm_file
            .api_key
            .or_else(|| cli.lastfm_api_key.clone());
        let lastfm_base_url = lastfm_file
            .base_url
            .unwrap_or_else(|| DEFAULT_LASTFM_BASE.to_string());

        let workers_file = file.workers.unwrap_or_default();
        let workers_defaults = WorkersSettings::default();
        let workers = WorkersSettings {
            genre_workers: workers_file
                .genre_workers
                .unwrap_or(workers_defaults.genre_workers),
            youtube_workers: workers_file
                .youtube_workers
                .unwrap_or(workers_defaults.youtube_workers),
            download_workers: workers_file
                .download_workers
                .unwrap_or(workers_defaults.download_workers),
            poll_interval: workers_file
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(workers_defaults.poll_interval),
            penalty_interval: workers_file
                .penalty_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(workers_defaults.penalty_interval),
        };

        let tracker_file = file.tracker.unwrap_or_default();
        let tracker_defaults = TrackerSettings::default();
        let tracker = TrackerSettings {
            poll_interval: tracker_file
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(tracker_defaults.poll_interval),
            max_poll_interval: tracker_file
                .max_poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(tracker_defaults.max_poll_interval),
        };

        let relay_file = file.relay.unwrap_or_default();
        let relay_defaults = RelayPolicy::default();
        let relay = RelayPolicy {
            poll_interval: relay_file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(relay_defaults.poll_interval),
            idle_log_after: relay_file
                .idle_log_after_secs
                .map(Duration::from_secs)
                .unwrap_or(relay_defaults.idle_log_after),
            reconnect_backoff: relay_file
                .reconnect_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(relay_defaults.reconnect_backoff),
        };

        let chat_file = file.chat.unwrap_or_default();
        let chat = match chat_file.gating.as_deref() {
            None | Some("defer") => ChatSettings {
                strategy: GateStrategy::Defer,
            },
            Some("block") => ChatSettings {
                strategy: GateStrategy::Block {
                    poll_interval: Duration::from_secs(
                        chat_file.gate_poll_interval_secs.unwrap_or(5),
                    ),
                },
            },
            Some(other) => bail!("Unknown chat gating strategy: {}", other),
        };

        Ok(Self {
            library_db,
            import_dir,
            music_dir,
            now_playing_url,
            chat_webhook_url,
            lastfm_api_key,
            lastfm_base_url,
            ytmusic_url,
            audio_format,
            workers,
            tracker,
            relay,
            chat,
        })
    }
}
