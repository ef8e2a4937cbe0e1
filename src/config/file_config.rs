use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub library_db: Option<String>,
    pub import_dir: Option<String>,
    pub music_dir: Option<String>,
    pub now_playing_url: Option<String>,
    pub chat_webhook_url: Option<String>,
    pub ytmusic_url: Option<String>,
    pub audio_format: Option<String>,

    // Feature configs
    pub lastfm: Option<LastfmConfig>,
    pub workers: Option<WorkersConfig>,
    pub tracker: Option<TrackerConfig>,
    pub relay: Option<RelayConfig>,
    pub chat: Option<ChatConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LastfmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkersConfig {
    pub genre_workers: Option<usize>,
    pub youtube_workers: Option<usize>,
    pub download_workers: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub penalty_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    pub poll_interval_secs: Option<u64>,
    pub max_poll_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RelayConfig {
    pub poll_interval_ms: Option<u64>,
    pub idle_log_after_secs: Option<u64>,
    pub reconnect_backoff_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ChatConfig {
    /// Gating strategy: "defer" (default) or "block".
    pub gating: Option<String>,
    pub gate_poll_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
