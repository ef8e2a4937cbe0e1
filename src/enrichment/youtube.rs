//! YouTube resolution stage: tracks → video codes.

use super::EnrichmentStage;
use crate::clients::YoutubeSource;
use crate::library::{Dimension, LibraryStore, WorkItem};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct YoutubeStage {
    store: Arc<dyn LibraryStore>,
    source: Arc<dyn YoutubeSource>,
}

impl YoutubeStage {
    pub fn new(store: Arc<dyn LibraryStore>, source: Arc<dyn YoutubeSource>) -> Self {
        Self { store, source }
    }
}

#[async_trait]
impl EnrichmentStage for YoutubeStage {
    type Output = String;

    fn dimension(&self) -> Dimension {
        Dimension::Youtube
    }

    async fn enrich(&self, item: &WorkItem) -> Result<Option<String>> {
        let Some(title) = item.title.as_deref().filter(|t| !t.is_empty()) else {
            warn!("Missing title on item {}, skipping search", item.id);
            return Ok(None);
        };
        if item.artist.is_empty() {
            warn!("Empty artist name on item {}, skipping search", item.id);
            return Ok(None);
        }
        // An empty search result completes the stage as a no-op; the track
        // simply has no resolvable code.
        self.source.search_video_id(&item.artist, title).await
    }

    fn persist(&self, item: &WorkItem, code: String) -> Result<()> {
        self.store.write_youtube_code(item.id, &code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubYoutubeSource {
        code: Option<String>,
    }

    #[async_trait]
    impl YoutubeSource for StubYoutubeSource {
        async fn search_video_id(&self, _artist: &str, _title: &str) -> Result<Option<String>> {
            Ok(self.code.clone())
        }
    }

    fn item(artist: &str, title: Option<&str>) -> WorkItem {
        WorkItem {
            id: 1,
            artist: artist.to_string(),
            title: title.map(str::to_string),
            youtube_code: None,
            workflow_id: None,
        }
    }

    fn stage(code: Option<&str>) -> YoutubeStage {
        YoutubeStage::new(
            Arc::new(crate::library::SqliteLibraryStore::in_memory().unwrap()),
            Arc::new(StubYoutubeSource {
                code: code.map(str::to_string),
            }),
        )
    }

    #[tokio::test]
    async fn test_enrich_returns_code() {
        let result = stage(Some("abc123"))
            .enrich(&item("Plaid", Some("Eyen")))
            .await
            .unwrap();
        assert_eq!(result.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_no_search_hit_is_no_result() {
        assert!(stage(None)
            .enrich(&item("Plaid", Some("Eyen")))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_missing_title_or_artist_skips_search() {
        assert!(stage(Some("abc"))
            .enrich(&item("Plaid", None))
            .await
            .unwrap()
            .is_none());
        assert!(stage(Some("abc"))
            .enrich(&item("", Some("Eyen")))
            .await
            .unwrap()
            .is_none());
    }
}
