//! Poll client for the local "now playing" endpoint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One observation of the playback transport.
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub listener_id: String,
    pub device_id: String,
    pub artist: String,
    pub title: String,
    pub album: String,
    pub duration_ms: i64,
    pub position_ms: i64,
    pub playing: bool,
}

/// Source of playback observations.
#[async_trait]
pub trait PlaybackSource: Send + Sync {
    /// The current snapshot, or None when nothing is playing. Must return
    /// within a bounded time; transport failures are errors.
    async fn poll(&self) -> Result<Option<PlaybackSnapshot>>;
}

/// HTTP client polling a MusicStream-style `/api/data` endpoint.
pub struct HttpPlaybackSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPlaybackSource {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PlaybackSource for HttpPlaybackSource {
    async fn poll(&self) -> Result<Option<PlaybackSnapshot>> {
        let url = format!("{}/api/data", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to reach playback source")?;

        if !response.status().is_success() {
            bail!("Playback source returned status {}", response.status());
        }

        let body: Value = response
            .json()
            .await
            .context("Invalid JSON from playback source")?;
        debug!("Playback source response: {}", body);

        Ok(parse_snapshot(&body))
    }
}

/// Coerce a value that may arrive as a number or a numeric string.
fn as_millis(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

/// A snapshot needs a title, an artist and a positive duration; anything
/// less is "nothing playing".
fn parse_snapshot(body: &Value) -> Option<PlaybackSnapshot> {
    let title = non_empty_str(&body["title"])?;
    let artist = non_empty_str(&body["artist"])?;
    let duration_ms = as_millis(&body["duration"]);
    if duration_ms == 0 {
        return None;
    }

    Some(PlaybackSnapshot {
        listener_id: body["listener"].as_str().unwrap_or("local").to_string(),
        device_id: body["device"].as_str().unwrap_or("default").to_string(),
        artist: artist.to_string(),
        title: title.to_string(),
        album: body["album"].as_str().unwrap_or("").to_string(),
        duration_ms,
        position_ms: as_millis(&body["position"]),
        playing: body["playing"].as_bool().unwrap_or(false),
    })
}
