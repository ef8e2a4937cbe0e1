//! The accountant loop: poll the playback source, maintain sessions, record
//! finalized plays.

use super::session::{FinalizedPlay, PlaybackSession, SessionKey, TrackInfo};
use crate::clients::{PlaybackSnapshot, PlaybackSource};
use crate::library::{LibraryStore, NewPlay};
use crate::workflow::{WorkflowFlag, WorkflowStore};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub poll_interval: Duration,
    /// Ceiling for the backoff applied while the source is offline.
    pub max_poll_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_interval: Duration::from_secs(60),
        }
    }
}

/// Writes finalized plays: workflow first, rows second, init flag last.
pub struct PlayRecorder {
    store: Arc<dyn LibraryStore>,
    workflows: Arc<dyn WorkflowStore>,
}

impl PlayRecorder {
    pub fn new(store: Arc<dyn LibraryStore>, workflows: Arc<dyn WorkflowStore>) -> Self {
        Self { store, workflows }
    }

    /// Record one play, returning the workflow id created for it.
    ///
    /// The workflow record is created before any catalog row so no
    /// notification can ever reference a missing workflow. Flags of stages
    /// that will not run (the artist or track row already exists, so no
    /// insert will trigger them) are pre-set at creation.
    pub fn record(&self, play: &FinalizedPlay) -> Result<String> {
        let state = self
            .store
            .lookup_enrichment_state(&play.track.artist, &play.track.title)?;
        let mut pre_set = Vec::new();
        if state.artist_genre_status.is_some() {
            pre_set.push(WorkflowFlag::Genre);
        }
        if state.track_youtube_status.is_some() {
            pre_set.push(WorkflowFlag::Youtube);
        }

        let workflow_id = self.workflows.create_workflow(&pre_set)?;
        let recorded = self.store.record_play(NewPlay {
            artist: play.track.artist.clone(),
            album: play.track.album.clone(),
            title: play.track.title.clone(),
            duration_ms: play.track.duration_ms,
            played_at: play.started_at_ms,
            skipped: play.skipped,
            workflow_id: workflow_id.clone(),
        })?;
        if recorded.play_id.is_none() {
            debug!("Play already recorded for {}", play.track.track_key());
        }
        self.workflows.set_flag(&workflow_id, WorkflowFlag::Init)?;
        Ok(workflow_id)
    }
}

/// Owns the session map and drives it from the playback source.
pub struct PlaybackAccountant {
    source: Arc<dyn PlaybackSource>,
    recorder: PlayRecorder,
    sessions: HashMap<SessionKey, PlaybackSession>,
    settings: TrackerSettings,
}

impl PlaybackAccountant {
    pub fn new(
        source: Arc<dyn PlaybackSource>,
        recorder: PlayRecorder,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            source,
            recorder,
            sessions: HashMap::new(),
            settings,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Playback accountant started (poll interval {:?})",
            self.settings.poll_interval
        );
        let mut interval = self.settings.poll_interval;
        let mut online = true;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => break,
            }

            match self.source.poll().await {
                Ok(snapshot) => {
                    if !online {
                        info!("Playback source is back online");
                        online = true;
                    }
                    interval = self.settings.poll_interval;
                    if let Some(snapshot) = snapshot {
                        self.ingest(snapshot, chrono::Utc::now().timestamp_millis());
                    }
                }
                Err(e) => {
                    // Offline source: double the interval up to the ceiling
                    // so a dead endpoint is not hammered.
                    interval = (interval * 2).min(self.settings.max_poll_interval);
                    if online {
                        warn!("Playback source went offline: {:#}", e);
                        online = false;
                    } else {
                        debug!("Playback source still offline: {:#}", e);
                    }
                }
            }
        }

        info!("Playback accountant stopped");
    }

    /// Feed one snapshot into the session map, recording any play it closes.
    fn ingest(&mut self, snapshot: PlaybackSnapshot, now_ms: i64) {
        let key = SessionKey {
            listener_id: snapshot.listener_id.clone(),
            device_id: snapshot.device_id.clone(),
        };
        let track = TrackInfo {
            artist: snapshot.artist,
            title: snapshot.title,
            album: snapshot.album,
            duration_ms: snapshot.duration_ms,
        };

        if let Some(session) = self.sessions.get_mut(&key) {
            if session.track_key() == track.track_key() {
                if let Some(finished) = session.observe(snapshot.position_ms, snapshot.playing, now_ms)
                {
                    self.record(finished);
                }
                return;
            }
        }

        // First observation for this key, or the track changed.
        if let Some(previous) = self.sessions.remove(&key) {
            if let Some(finished) = previous.finalize(now_ms) {
                self.record(finished);
            }
        }
        self.sessions
            .insert(key, PlaybackSession::start(track, snapshot.position_ms, now_ms));
    }

    fn record(&self, play: FinalizedPlay) {
        info!(
            "Song ended: {} accumulated={}ms skipped={}",
            play.track.track_key(),
            play.accumulated_ms,
            play.skipped
        );
        if let Err(e) = self.recorder.record(&play) {
            error!(
                "Failed to record play of {}: {:#}",
                play.track.track_key(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::SqliteLibraryStore;
    use crate::workflow::ALL_FLAGS;

    fn snapshot(
        artist: &str,
        title: &str,
        duration_ms: i64,
        position_ms: i64,
        playing: bool,
    ) -> PlaybackSnapshot {
        PlaybackSnapshot {
            listener_id: "local".to_string(),
            device_id: "default".to_string(),
            artist: artist.to_string(),
            title: title.to_string(),
            album: "Album".to_string(),
            duration_ms,
            position_ms,
            playing,
        }
    }

    struct NullSource;

    #[async_trait::async_trait]
    impl PlaybackSource for NullSource {
        async fn poll(&self) -> Result<Option<PlaybackSnapshot>> {
            Ok(None)
        }
    }

    fn accountant_over(store: Arc<SqliteLibraryStore>) -> PlaybackAccountant {
        let recorder = PlayRecorder::new(store.clone(), store);
        PlaybackAccountant::new(Arc::new(NullSource), recorder, TrackerSettings::default())
    }

    fn latest_play(store: &SqliteLibraryStore) -> Option<(String, bool, String)> {
        let conn = store.connection().lock().unwrap();
        conn.query_row(
            r#"SELECT t.title, tp.skipped, tp.workflow_id
               FROM track_plays tp JOIN tracks t ON t.id = tp.track_id
               ORDER BY tp.id DESC LIMIT 1"#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .ok()
    }

    #[test]
    fn test_track_change_records_skipped_play() {
        let store = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let mut accountant = accountant_over(store.clone());

        // Track A half-listened, then the track changes.
        accountant.ingest(snapshot("Plaid", "Eyen", 200_000, 0, true), 0);
        accountant.ingest(snapshot("Plaid", "Eyen", 200_000, 50_000, true), 50_000);
        accountant.ingest(snapshot("Plaid", "Eyen", 200_000, 100_000, true), 100_000);
        accountant.ingest(snapshot("Autechre", "Bike", 300_000, 0, true), 101_000);

        let (title, skipped, _) = latest_play(&store).unwrap();
        assert_eq!(title, "Eyen");
        assert!(skipped);
        // The new session is live, not yet recorded.
        assert_eq!(accountant.sessions.len(), 1);
    }

    #[test]
    fn test_sessions_are_independent_per_key() {
        let store = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let mut accountant = accountant_over(store.clone());

        let mut kitchen = snapshot("Plaid", "Eyen", 200_000, 0, true);
        kitchen.device_id = "kitchen".to_string();
        accountant.ingest(snapshot("Plaid", "Eyen", 200_000, 0, true), 0);
        accountant.ingest(kitchen, 0);

        assert_eq!(accountant.sessions.len(), 2);
    }

    #[test]
    fn test_recorder_creates_gated_workflow() {
        let store = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let recorder = PlayRecorder::new(store.clone(), store.clone());

        let play = FinalizedPlay {
            track: TrackInfo {
                artist: "Plaid".to_string(),
                title: "Eyen".to_string(),
                album: "Double Figure".to_string(),
                duration_ms: 200_000,
            },
            started_at_ms: 1_700_000_000_000,
            accumulated_ms: 195_000,
            skipped: false,
        };
        recorder.record(&play).unwrap();

        let (_, _, workflow_id) = latest_play(&store).unwrap();
        // New artist and track: enrichment pending, workflow gated on it.
        assert!(store.is_ready(&workflow_id, &[WorkflowFlag::Init]).unwrap());
        assert!(!store.is_ready(&workflow_id, ALL_FLAGS).unwrap());
    }

    #[test]
    fn test_recorder_pre_sets_flags_for_known_rows() {
        let store = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let recorder = PlayRecorder::new(store.clone(), store.clone());

        let play = FinalizedPlay {
            track: TrackInfo {
                artist: "Plaid".to_string(),
                title: "Eyen".to_string(),
                album: "Double Figure".to_string(),
                duration_ms: 200_000,
            },
            started_at_ms: 1_700_000_000_000,
            accumulated_ms: 195_000,
            skipped: false,
        };
        recorder.record(&play).unwrap();

        // Second play of the same track: no inserts will fire, so the
        // enrichment flags must be pre-set and the workflow ready at once.
        let mut second = play.clone();
        second.started_at_ms += 300_000;
        recorder.record(&second).unwrap();

        let (_, _, workflow_id) = latest_play(&store).unwrap();
        assert!(store.is_ready(&workflow_id, ALL_FLAGS).unwrap());
    }
}
