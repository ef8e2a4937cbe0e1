//! Audio download stage: tracks with a resolved code → files on disk.

use super::EnrichmentStage;
use crate::clients::{AudioFetcher, DownloadRequest, DownloadedAudio};
use crate::library::{Dimension, LibraryStore, WorkItem};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct DownloadStage {
    store: Arc<dyn LibraryStore>,
    fetcher: Arc<dyn AudioFetcher>,
}

impl DownloadStage {
    pub fn new(store: Arc<dyn LibraryStore>, fetcher: Arc<dyn AudioFetcher>) -> Self {
        Self { store, fetcher }
    }
}

#[async_trait]
impl EnrichmentStage for DownloadStage {
    type Output = DownloadedAudio;

    fn dimension(&self) -> Dimension {
        Dimension::Download
    }

    async fn enrich(&self, item: &WorkItem) -> Result<Option<DownloadedAudio>> {
        // The work-queue view only yields tracks with a code, but the row
        // may have changed between the poll and the claim.
        let (Some(code), Some(title)) = (item.youtube_code.as_deref(), item.title.as_deref())
        else {
            warn!("Item {} lost its code or title, skipping", item.id);
            return Ok(None);
        };
        let audio = self
            .fetcher
            .fetch(&DownloadRequest {
                track_id: item.id,
                artist: item.artist.clone(),
                title: title.to_string(),
                youtube_code: code.to_string(),
            })
            .await?;
        Ok(Some(audio))
    }

    fn persist(&self, item: &WorkItem, audio: DownloadedAudio) -> Result<()> {
        self.store.write_download_result(
            item.id,
            &audio.file_path.to_string_lossy(),
            &audio.audio_format,
        )
    }
}
