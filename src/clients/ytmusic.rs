//! YouTube Music search, used to resolve a video code per track.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SEARCH_LIMIT: usize = 5;

/// Source of YouTube video codes for (artist, title) pairs.
#[async_trait]
pub trait YoutubeSource: Send + Sync {
    /// The best-matching video id, or None when the search finds nothing.
    async fn search_video_id(&self, artist: &str, title: &str) -> Result<Option<String>>;
}

/// HTTP client for a ytmusicapi-compatible search service.
pub struct YtmusicClient {
    client: reqwest::Client,
    base_url: String,
}

impl YtmusicClient {
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
impl YoutubeSource for YtmusicClient {
    async fn search_video_id(&self, artist: &str, title: &str) -> Result<Option<String>> {
        let query = format!("{} {}", artist, title);
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query.as_str()),
                ("filter", "songs"),
                ("limit", &SEARCH_LIMIT.to_string()),
            ])
            .send()
            .await
            .context("Failed to reach YouTube Music search")?;

        if !response.status().is_success() {
            bail!("YouTube Music search returned status {}", response.status());
        }

        let body: Value = response
            .json()
            .await
            .context("Invalid JSON from YouTube Music search")?;
        debug!("Search response for '{}': {}", query, body);

        Ok(parse_first_video_id(&body))
    }
}

/// The `videoId` of the first search result, if any.
fn parse_first_video_id(body: &Value) -> Option<String> {
    body.as_array()?
        .first()?
        .get("videoId")?
        .as_str()
        .map(str::to_string)
}
