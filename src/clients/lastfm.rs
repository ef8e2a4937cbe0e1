//! Last.fm artist tag lookup.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Tags with a count at or below this are considered noise.
const MIN_TAG_COUNT: i64 = 50;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of genre tags for an artist.
#[async_trait]
pub trait GenreSource: Send + Sync {
    /// Genres for the artist, most relevant first. An empty vec means the
    /// service answered but nothing passed the relevance threshold.
    async fn top_genres(&self, artist: &str) -> Result<Vec<String>>;
}

/// HTTP client for the Last.fm `artist.getTopTags` endpoint.
pub struct LastfmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LastfmClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl GenreSource for LastfmClient {
    async fn top_genres(&self, artist: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("method", "artist.getTopTags"),
                ("api_key", self.api_key.as_str()),
                ("artist", artist),
                ("format", "json"),
            ])
            .send()
            .await
            .context("Failed to reach Last.fm")?;

        if !response.status().is_success() {
            bail!("Last.fm returned status {}", response.status());
        }

        let body: Value = response
            .json()
            .await
            .context("Invalid JSON from Last.fm")?;
        debug!("Last.fm response for {}: {}", artist, body);

        parse_top_tags(&body)
    }
}

/// Extract tag names above the relevance threshold from a top-tags response.
fn parse_top_tags(body: &Value) -> Result<Vec<String>> {
    let tags = &body["toptags"]["tag"];
    if tags.is_null() {
        return Ok(Vec::new());
    }
    let Some(tags) = tags.as_array() else {
        bail!("Last.fm returned unexpected tag structure");
    };

    Ok(tags
        .iter()
        .filter(|tag| tag_count(tag) > MIN_TAG_COUNT)
        .filter_map(|tag| tag["name"].as_str().map(str::to_string))
        .collect())
}

/// Tag counts arrive as numbers or numeric strings depending on the mirror.
fn tag_count(tag: &Value) -> i64 {
    match &tag["count"] {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
