//! Shared fixtures for pipeline integration tests: a temp-file library
//! database plus stub collaborators for every external boundary.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scrobblino_pipeline_server::chat::{ChatClient, ChatMessage};
use scrobblino_pipeline_server::clients::{
    GenreSource, PlaybackSnapshot, PlaybackSource, YoutubeSource,
};
use scrobblino_pipeline_server::enrichment::WorkerPoolSettings;
use scrobblino_pipeline_server::library::SqliteLibraryStore;
use scrobblino_pipeline_server::notify::RelayPolicy;
use tempfile::TempDir;

pub struct TestDb {
    // Held so the database file outlives the test.
    pub dir: TempDir,
    pub store: Arc<SqliteLibraryStore>,
}

pub fn test_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteLibraryStore::new(dir.path().join("library.db")).unwrap());
    TestDb { dir, store }
}

impl TestDb {
    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("library.db")
    }
}

pub fn fast_pool_settings(workers: usize) -> WorkerPoolSettings {
    WorkerPoolSettings {
        workers,
        poll_interval: Duration::from_millis(10),
        penalty_interval: Duration::from_millis(10),
    }
}

pub fn fast_relay_policy() -> RelayPolicy {
    RelayPolicy {
        poll_interval: Duration::from_millis(5),
        idle_log_after: Duration::from_millis(100),
        reconnect_backoff: Duration::from_millis(20),
    }
}

/// Poll `condition` until it holds, panicking after ~5 seconds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

pub struct StubGenreSource {
    pub genres: Vec<String>,
}

#[async_trait]
impl GenreSource for StubGenreSource {
    async fn top_genres(&self, _artist: &str) -> Result<Vec<String>> {
        Ok(self.genres.clone())
    }
}

pub struct StubYoutubeSource {
    pub code: Option<String>,
}

#[async_trait]
impl YoutubeSource for StubYoutubeSource {
    async fn search_video_id(&self, _artist: &str, _title: &str) -> Result<Option<String>> {
        Ok(self.code.clone())
    }
}

#[derive(Default)]
pub struct CapturingChatClient {
    pub sent: Mutex<Vec<ChatMessage>>,
}

impl CapturingChatClient {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatClient for CapturingChatClient {
    async fn send(&self, message: &ChatMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Replays a fixed sequence of snapshots, then reports nothing playing.
pub struct ScriptedPlaybackSource {
    snapshots: Mutex<VecDeque<Option<PlaybackSnapshot>>>,
}

impl ScriptedPlaybackSource {
    pub fn new(snapshots: Vec<Option<PlaybackSnapshot>>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.snapshots.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl PlaybackSource for ScriptedPlaybackSource {
    async fn poll(&self) -> Result<Option<PlaybackSnapshot>> {
        Ok(self.snapshots.lock().unwrap().pop_front().flatten())
    }
}

pub fn snapshot(
    artist: &str,
    title: &str,
    duration_ms: i64,
    position_ms: i64,
    playing: bool,
) -> Option<PlaybackSnapshot> {
    Some(PlaybackSnapshot {
        listener_id: "local".to_string(),
        device_id: "default".to_string(),
        artist: artist.to_string(),
        title: title.to_string(),
        album: "Test Album".to_string(),
        duration_ms,
        position_ms,
        playing,
    })
}
