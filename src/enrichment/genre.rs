//! Genre enrichment stage: artists → Last.fm tags.

use super::EnrichmentStage;
use crate::clients::GenreSource;
use crate::library::{Dimension, LibraryStore, WorkItem};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct GenreStage {
    store: Arc<dyn LibraryStore>,
    source: Arc<dyn GenreSource>,
}

impl GenreStage {
    pub fn new(store: Arc<dyn LibraryStore>, source: Arc<dyn GenreSource>) -> Self {
        Self { store, source }
    }
}

#[async_trait]
impl EnrichmentStage for GenreStage {
    type Output = Vec<String>;

    fn dimension(&self) -> Dimension {
        Dimension::Genre
    }

    async fn enrich(&self, item: &WorkItem) -> Result<Option<Vec<String>>> {
        if item.artist.is_empty() {
            warn!("Empty artist name on item {}, skipping lookup", item.id);
            return Ok(None);
        }
        let genres = self.source.top_genres(&item.artist).await?;
        // Nothing above the relevance threshold is a completed no-op, not a
        // failure; the artist must not be retried forever.
        if genres.is_empty() {
            return Ok(None);
        }
        Ok(Some(genres))
    }

    fn persist(&self, item: &WorkItem, genres: Vec<String>) -> Result<()> {
        self.store.write_artist_genres(item.id, &genres)
    }
}
