//! Library storage and persistence.
//!
//! Provides SQLite-backed storage for the catalog, the enrichment work
//! queues, and play records. All state transitions used for coordination are
//! single conditional statements so that concurrent workers (or processes)
//! never need an in-memory lock.

use super::models::*;
use super::schema::LIBRARY_VERSIONED_SCHEMAS;
use crate::notify::{
    publish, ArtistInsertedPayload, TrackInsertedPayload, ARTISTS_CHANNEL, TRACKS_CHANNEL,
};
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const MAX_ERROR_MESSAGE_LEN: usize = 1000;

/// Trait for library storage operations.
pub trait LibraryStore: Send + Sync {
    // === Plays ===

    /// Record a finalized play, creating artist/album/track rows as needed.
    ///
    /// New artist and track rows are stamped with the play's workflow id and
    /// enter the enrichment queues with status `none`; their creation is
    /// published on the corresponding notification channel in the same
    /// transaction.
    fn record_play(&self, play: NewPlay) -> Result<RecordedPlay>;

    /// Look up the enrichment state of already-known rows for a play, so the
    /// caller can pre-set workflow flags for stages that will not run.
    fn lookup_enrichment_state(&self, artist: &str, title: &str) -> Result<KnownItemState>;

    // === Work queue views + claim protocol ===

    /// The single oldest eligible item with status `none` for a dimension.
    fn next_pending(&self, dimension: Dimension) -> Result<Option<WorkItem>>;

    /// Atomically claim an item (`none` → `loading`). Returns true iff this
    /// caller won the transition; false means another worker owns the item.
    fn try_claim(&self, dimension: Dimension, item_id: i64) -> Result<bool>;

    /// Terminal mark, idempotent, callable from any state.
    fn mark_done(&self, dimension: Dimension, item_id: i64) -> Result<()>;

    /// Terminal mark with a truncated error message, idempotent.
    fn mark_error(&self, dimension: Dimension, item_id: i64, message: &str) -> Result<()>;

    // === Stage result writes ===

    fn write_artist_genres(&self, artist_id: i64, genres: &[String]) -> Result<()>;

    fn write_youtube_code(&self, track_id: i64, code: &str) -> Result<()>;

    fn write_download_result(&self, track_id: i64, file_path: &str, audio_format: &str)
        -> Result<()>;

    // === Announcement queries ===

    /// The play belonging to a workflow, hydrated with artist/genres/code.
    fn get_announcement(&self, workflow_id: &str) -> Result<Option<PlayAnnouncement>>;

    /// The play immediately preceding `play_id`, if any.
    fn get_previous_announcement(&self, play_id: i64) -> Result<Option<PlayAnnouncement>>;

    // === Backfill ===

    /// Re-queue artists whose genre lookup is terminal but produced nothing.
    fn requeue_artists_without_genres(&self) -> Result<usize>;

    /// Re-queue tracks whose YouTube resolution is terminal without a code.
    fn requeue_tracks_without_youtube_code(&self) -> Result<usize>;
}

/// SQLite-backed library store.
pub struct SqliteLibraryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLibraryStore {
    /// Open an existing library database or create a new one with the
    /// current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let exists = db_path.as_ref().exists();
        let conn = Connection::open(&db_path)?;
        if !exists {
            LIBRARY_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new library database at {:?}", db_path.as_ref());
        }
        Self::init(conn)
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        LIBRARY_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        // Concurrent readers (relay connections) share the file with this
        // writer, so WAL mode and a busy timeout are required.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Library database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = LIBRARY_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Library database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        #[cfg(not(feature = "no_checks"))]
        LIBRARY_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteLibraryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = LIBRARY_VERSIONED_SCHEMAS.len() - 1;
        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating library database from version {} to {}",
            current_version, target_version
        );

        for schema in LIBRARY_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Running library migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;
        Ok(())
    }

    /// Shared connection handle, used by sibling trait impls on this store.
    pub(crate) fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// (table, status column, error column) for a dimension.
    fn dimension_columns(dimension: Dimension) -> (&'static str, &'static str, &'static str) {
        match dimension {
            Dimension::Genre => ("artists", "genre_status", "genre_error"),
            Dimension::Youtube => ("tracks", "youtube_status", "youtube_error"),
            Dimension::Download => ("tracks", "download_status", "download_error"),
        }
    }

    fn hydrate_announcement(
        conn: &Connection,
        row: (i64, i64, String, String, bool, Option<String>),
    ) -> Result<PlayAnnouncement> {
        let (play_id, artist_id, artist, title, skipped, youtube_code) = row;
        let mut stmt = conn.prepare(
            r#"SELECT g.name FROM genres g
               JOIN artist_genres ag ON ag.genre_id = g.id
               WHERE ag.artist_id = ?1
               ORDER BY g.name ASC"#,
        )?;
        let genres = stmt
            .query_map([artist_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(PlayAnnouncement {
            play_id,
            artist,
            title,
            genres,
            skipped,
            youtube_code,
        })
    }

    fn announcement_by_filter(
        &self,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<PlayAnnouncement>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"SELECT tp.id, a.id, a.name, t.title, tp.skipped, t.youtube_code
               FROM track_plays tp
               JOIN tracks t ON t.id = tp.track_id
               JOIN artists a ON a.id = t.artist_id
               WHERE {}
               ORDER BY tp.id DESC
               LIMIT 1"#,
            where_clause
        );
        let row = conn
            .query_row(&sql, params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .optional()?;

        match row {
            Some(row) => Ok(Some(Self::hydrate_announcement(&conn, row)?)),
            None => Ok(None),
        }
    }

    fn now_secs() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl LibraryStore for SqliteLibraryStore {
    fn record_play(&self, play: NewPlay) -> Result<RecordedPlay> {
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Self::now_secs();

        // Artist
        let existing_artist: Option<i64> = tx
            .query_row(
                "SELECT id FROM artists WHERE name = ?1",
                [&play.artist],
                |row| row.get(0),
            )
            .optional()?;
        let (artist_id, artist_created) = match existing_artist {
            Some(id) => (id, false),
            None => {
                tx.execute(
                    r#"INSERT INTO artists (name, genre_status, workflow_id, created_at)
                       VALUES (?1, 'none', ?2, ?3)"#,
                    rusqlite::params![play.artist, play.workflow_id, now],
                )?;
                let id = tx.last_insert_rowid();
                publish(
                    &tx,
                    ARTISTS_CHANNEL,
                    &ArtistInsertedPayload {
                        id,
                        name: play.artist.clone(),
                        workflow_id: Some(play.workflow_id.clone()),
                    },
                )?;
                (id, true)
            }
        };

        // Album (plays without album metadata skip this)
        let album_id: Option<i64> = if play.album.is_empty() {
            None
        } else {
            tx.execute(
                "INSERT OR IGNORE INTO albums (artist_id, title, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![artist_id, play.album, now],
            )?;
            tx.query_row(
                "SELECT id FROM albums WHERE artist_id = ?1 AND title = ?2",
                rusqlite::params![artist_id, play.album],
                |row| row.get(0),
            )
            .optional()?
        };

        // Track
        let existing_track: Option<i64> = tx
            .query_row(
                "SELECT id FROM tracks WHERE artist_id = ?1 AND title = ?2",
                rusqlite::params![artist_id, play.title],
                |row| row.get(0),
            )
            .optional()?;
        let (track_id, track_created) = match existing_track {
            Some(id) => {
                tx.execute(
                    "UPDATE tracks SET duration_ms = ?1 WHERE id = ?2",
                    rusqlite::params![play.duration_ms, id],
                )?;
                (id, false)
            }
            None => {
                tx.execute(
                    r#"INSERT INTO tracks (
                        artist_id, title, duration_ms,
                        youtube_status, download_status, workflow_id, created_at
                    ) VALUES (?1, ?2, ?3, 'none', 'none', ?4, ?5)"#,
                    rusqlite::params![artist_id, play.title, play.duration_ms, play.workflow_id, now],
                )?;
                let id = tx.last_insert_rowid();
                publish(
                    &tx,
                    TRACKS_CHANNEL,
                    &TrackInsertedPayload {
                        id,
                        title: play.title.clone(),
                        artist_id,
                        workflow_id: Some(play.workflow_id.clone()),
                    },
                )?;
                (id, true)
            }
        };

        if let Some(album_id) = album_id {
            tx.execute(
                "INSERT OR IGNORE INTO album_tracks (album_id, track_id) VALUES (?1, ?2)",
                rusqlite::params![album_id, track_id],
            )?;
        }

        // Play
        let inserted = tx.execute(
            r#"INSERT OR IGNORE INTO track_plays (track_id, played_at, skipped, workflow_id, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            rusqlite::params![track_id, play.played_at, play.skipped, play.workflow_id, now],
        )?;
        let play_id = if inserted > 0 {
            Some(tx.last_insert_rowid())
        } else {
            None
        };

        tx.commit()?;

        Ok(RecordedPlay {
            play_id,
            artist_id,
            track_id,
            artist_created,
            track_created,
        })
    }

    fn lookup_enrichment_state(&self, artist: &str, title: &str) -> Result<KnownItemState> {
        let conn = self.conn.lock().unwrap();
        let artist_genre_status: Option<EnrichmentStatus> = conn
            .query_row(
                "SELECT genre_status FROM artists WHERE name = ?1",
                [artist],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|s| EnrichmentStatus::from_db_str(&s));
        let track_youtube_status: Option<EnrichmentStatus> = conn
            .query_row(
                r#"SELECT t.youtube_status FROM tracks t
                   JOIN artists a ON a.id = t.artist_id
                   WHERE a.name = ?1 AND t.title = ?2"#,
                rusqlite::params![artist, title],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|s| EnrichmentStatus::from_db_str(&s));

        Ok(KnownItemState {
            artist_genre_status,
            track_youtube_status,
        })
    }

    fn next_pending(&self, dimension: Dimension) -> Result<Option<WorkItem>> {
        let conn = self.conn.lock().unwrap();
        let item = match dimension {
            Dimension::Genre => conn
                .query_row(
                    r#"SELECT id, name, workflow_id FROM artists
                       WHERE genre_status = 'none'
                       ORDER BY created_at ASC, id ASC
                       LIMIT 1"#,
                    [],
                    |row| {
                        Ok(WorkItem {
                            id: row.get(0)?,
                            artist: row.get(1)?,
                            title: None,
                            youtube_code: None,
                            workflow_id: row.get(2)?,
                        })
                    },
                )
                .optional()?,
            Dimension::Youtube => conn
                .query_row(
                    r#"SELECT t.id, a.name, t.title, t.youtube_code, t.workflow_id
                       FROM tracks t
                       JOIN artists a ON a.id = t.artist_id
                       WHERE t.youtube_status = 'none'
                       ORDER BY t.created_at ASC, t.id ASC
                       LIMIT 1"#,
                    [],
                    |row| {
                        Ok(WorkItem {
                            id: row.get(0)?,
                            artist: row.get(1)?,
                            title: row.get(2)?,
                            youtube_code: row.get(3)?,
                            workflow_id: row.get(4)?,
                        })
                    },
                )
                .optional()?,
            Dimension::Download => conn
                .query_row(
                    r#"SELECT t.id, a.name, t.title, t.youtube_code, t.workflow_id
                       FROM tracks t
                       JOIN artists a ON a.id = t.artist_id
                       WHERE t.download_status = 'none' AND t.youtube_code IS NOT NULL
                       ORDER BY t.created_at ASC, t.id ASC
                       LIMIT 1"#,
                    [],
                    |row| {
                        Ok(WorkItem {
                            id: row.get(0)?,
                            artist: row.get(1)?,
                            title: row.get(2)?,
                            youtube_code: row.get(3)?,
                            workflow_id: row.get(4)?,
                        })
                    },
                )
                .optional()?,
        };
        Ok(item)
    }

    fn try_claim(&self, dimension: Dimension, item_id: i64) -> Result<bool> {
        let (table, status_col, _) = Self::dimension_columns(dimension);
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = 'loading' WHERE id = ?1 AND {} = 'none'",
                table, status_col, status_col
            ),
            [item_id],
        )?;
        Ok(changed == 1)
    }

    fn mark_done(&self, dimension: Dimension, item_id: i64) -> Result<()> {
        let (table, status_col, error_col) = Self::dimension_columns(dimension);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "UPDATE {} SET {} = 'done', {} = NULL WHERE id = ?1",
                table, status_col, error_col
            ),
            [item_id],
        )?;
        Ok(())
    }

    fn mark_error(&self, dimension: Dimension, item_id: i64, message: &str) -> Result<()> {
        let (table, status_col, error_col) = Self::dimension_columns(dimension);
        let truncated: String = message.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "UPDATE {} SET {} = 'error', {} = ?1 WHERE id = ?2",
                table, status_col, error_col
            ),
            rusqlite::params![truncated, item_id],
        )?;
        Ok(())
    }

    fn write_artist_genres(&self, artist_id: i64, genres: &[String]) -> Result<()> {
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction()?;
        for genre in genres {
            tx.execute("INSERT OR IGNORE INTO genres (name) VALUES (?1)", [genre])?;
            tx.execute(
                r#"INSERT OR IGNORE INTO artist_genres (artist_id, genre_id)
                   SELECT ?1, id FROM genres WHERE name = ?2"#,
                rusqlite::params![artist_id, genre],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn write_youtube_code(&self, track_id: i64, code: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE tracks SET youtube_code = ?1 WHERE id = ?2",
            rusqlite::params![code, track_id],
        )?;
        if changed == 0 {
            bail!("No track row updated when writing YouTube code for {}", track_id);
        }
        Ok(())
    }

    fn write_download_result(
        &self,
        track_id: i64,
        file_path: &str,
        audio_format: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE tracks
               SET file_path = ?1, audio_format = ?2, downloaded_at = ?3
               WHERE id = ?4"#,
            rusqlite::params![file_path, audio_format, Self::now_secs(), track_id],
        )?;
        if changed == 0 {
            bail!("No track row updated when writing download result for {}", track_id);
        }
        Ok(())
    }

    fn get_announcement(&self, workflow_id: &str) -> Result<Option<PlayAnnouncement>> {
        self.announcement_by_filter("tp.workflow_id = ?1", [workflow_id])
    }

    fn get_previous_announcement(&self, play_id: i64) -> Result<Option<PlayAnnouncement>> {
        self.announcement_by_filter("tp.id < ?1", [play_id])
    }

    fn requeue_artists_without_genres(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE artists SET genre_status = 'none', genre_error = NULL
               WHERE genre_status IN ('done', 'error')
               AND id NOT IN (SELECT DISTINCT artist_id FROM artist_genres)"#,
            [],
        )?;
        Ok(changed)
    }

    fn requeue_tracks_without_youtube_code(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"UPDATE tracks SET youtube_status = 'none', youtube_error = NULL
               WHERE youtube_status IN ('done', 'error')
               AND youtube_code IS NULL"#,
            [],
        )?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_play(artist: &str, title: &str, workflow_id: &str) -> NewPlay {
        NewPlay {
            artist: artist.to_string(),
            album: "Some Album".to_string(),
            title: title.to_string(),
            duration_ms: 200_000,
            played_at: 1_700_000_000_000,
            skipped: false,
            workflow_id: workflow_id.to_string(),
        }
    }

    fn notification_count(store: &SqliteLibraryStore, channel: &str) -> i64 {
        let conn = store.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE channel = ?1",
            [channel],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_create_new_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("library.db");

        let store = SqliteLibraryStore::new(&db_path).unwrap();
        assert!(db_path.exists());

        let conn = store.conn.lock().unwrap();
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='artists'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_open_existing_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("library.db");
        {
            let _store = SqliteLibraryStore::new(&db_path).unwrap();
        }
        // Reopening validates the schema instead of recreating it.
        let _store = SqliteLibraryStore::new(&db_path).unwrap();
    }

    #[test]
    fn test_record_play_creates_rows_and_publishes() {
        let store = SqliteLibraryStore::in_memory().unwrap();

        let recorded = store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        assert!(recorded.play_id.is_some());
        assert!(recorded.artist_created);
        assert!(recorded.track_created);
        assert_eq!(notification_count(&store, ARTISTS_CHANNEL), 1);
        assert_eq!(notification_count(&store, TRACKS_CHANNEL), 1);
    }

    #[test]
    fn test_record_play_reuses_existing_rows() {
        let store = SqliteLibraryStore::in_memory().unwrap();

        let first = store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        let mut second_play = sample_play("Boards", "Roygbiv", "wf-2");
        second_play.played_at += 60_000;
        let second = store.record_play(second_play).unwrap();

        assert_eq!(first.artist_id, second.artist_id);
        assert_eq!(first.track_id, second.track_id);
        assert!(!second.artist_created);
        assert!(!second.track_created);
        // No new insert notifications for reused rows.
        assert_eq!(notification_count(&store, ARTISTS_CHANNEL), 1);
        assert_eq!(notification_count(&store, TRACKS_CHANNEL), 1);
    }

    #[test]
    fn test_record_play_deduplicates_same_played_at() {
        let store = SqliteLibraryStore::in_memory().unwrap();

        let first = store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        let second = store.record_play(sample_play("Boards", "Roygbiv", "wf-2")).unwrap();

        assert!(first.play_id.is_some());
        assert!(second.play_id.is_none());
    }

    #[test]
    fn test_next_pending_fifo_order() {
        let store = SqliteLibraryStore::in_memory().unwrap();

        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO artists (name, genre_status, created_at) VALUES ('newer', 'none', 2000)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO artists (name, genre_status, created_at) VALUES ('older', 'none', 1000)",
                [],
            )
            .unwrap();
        }

        let next = store.next_pending(Dimension::Genre).unwrap().unwrap();
        assert_eq!(next.artist, "older");
    }

    #[test]
    fn test_next_pending_download_requires_youtube_code() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();

        // Without a code the track is not eligible for download.
        assert!(store.next_pending(Dimension::Download).unwrap().is_none());

        let track = store.next_pending(Dimension::Youtube).unwrap().unwrap();
        store.write_youtube_code(track.id, "dQw4w9WgXcQ").unwrap();

        let item = store.next_pending(Dimension::Download).unwrap().unwrap();
        assert_eq!(item.youtube_code.as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn test_try_claim_wins_once() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        let item = store.next_pending(Dimension::Genre).unwrap().unwrap();

        assert!(store.try_claim(Dimension::Genre, item.id).unwrap());
        assert!(!store.try_claim(Dimension::Genre, item.id).unwrap());
    }

    #[test]
    fn test_try_claim_exclusive_under_concurrency() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("library.db");
        let store = Arc::new(SqliteLibraryStore::new(&db_path).unwrap());
        store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        let item = store.next_pending(Dimension::Genre).unwrap().unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.try_claim(Dimension::Genre, item.id).unwrap()
            }));
        }
        let successes = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|claimed| *claimed)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_claimed_item_leaves_queue() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        let item = store.next_pending(Dimension::Genre).unwrap().unwrap();

        store.try_claim(Dimension::Genre, item.id).unwrap();
        assert!(store.next_pending(Dimension::Genre).unwrap().is_none());
    }

    #[test]
    fn test_mark_done_and_error_are_idempotent() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        let item = store.next_pending(Dimension::Genre).unwrap().unwrap();

        store.mark_error(Dimension::Genre, item.id, "boom").unwrap();
        store.mark_error(Dimension::Genre, item.id, "boom").unwrap();
        store.mark_done(Dimension::Genre, item.id).unwrap();
        store.mark_done(Dimension::Genre, item.id).unwrap();

        let conn = store.conn.lock().unwrap();
        let (status, error): (String, Option<String>) = conn
            .query_row(
                "SELECT genre_status, genre_error FROM artists WHERE id = ?1",
                [item.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "done");
        assert!(error.is_none());
    }

    #[test]
    fn test_mark_error_truncates_message() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        let item = store.next_pending(Dimension::Genre).unwrap().unwrap();

        let long_message = "x".repeat(5000);
        store.mark_error(Dimension::Genre, item.id, &long_message).unwrap();

        let conn = store.conn.lock().unwrap();
        let error: String = conn
            .query_row(
                "SELECT genre_error FROM artists WHERE id = ?1",
                [item.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(error.len(), MAX_ERROR_MESSAGE_LEN);
    }

    #[test]
    fn test_write_artist_genres_and_announcement() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        let recorded = store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();

        store
            .write_artist_genres(
                recorded.artist_id,
                &["idm".to_string(), "ambient".to_string()],
            )
            .unwrap();
        // Writing the same genres twice is a no-op.
        store
            .write_artist_genres(recorded.artist_id, &["idm".to_string()])
            .unwrap();
        store.write_youtube_code(recorded.track_id, "abc123").unwrap();

        let announcement = store.get_announcement("wf-1").unwrap().unwrap();
        assert_eq!(announcement.artist, "Boards");
        assert_eq!(announcement.title, "Roygbiv");
        assert_eq!(announcement.genres, vec!["ambient", "idm"]);
        assert_eq!(announcement.youtube_code.as_deref(), Some("abc123"));
        assert!(!announcement.skipped);
    }

    #[test]
    fn test_get_previous_announcement() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        let mut second = sample_play("Plaid", "Eyen", "wf-2");
        second.played_at += 60_000;
        store.record_play(second).unwrap();

        let current = store.get_announcement("wf-2").unwrap().unwrap();
        let previous = store.get_previous_announcement(current.play_id).unwrap().unwrap();
        assert_eq!(previous.artist, "Boards");

        let first = store.get_announcement("wf-1").unwrap().unwrap();
        assert!(store.get_previous_announcement(first.play_id).unwrap().is_none());
    }

    #[test]
    fn test_lookup_enrichment_state() {
        let store = SqliteLibraryStore::in_memory().unwrap();

        let state = store.lookup_enrichment_state("Boards", "Roygbiv").unwrap();
        assert!(state.artist_genre_status.is_none());
        assert!(state.track_youtube_status.is_none());

        store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();
        let state = store.lookup_enrichment_state("Boards", "Roygbiv").unwrap();
        assert_eq!(state.artist_genre_status, Some(EnrichmentStatus::None));
        assert_eq!(state.track_youtube_status, Some(EnrichmentStatus::None));
    }

    #[test]
    fn test_requeue_backfills() {
        let store = SqliteLibraryStore::in_memory().unwrap();
        let recorded = store.record_play(sample_play("Boards", "Roygbiv", "wf-1")).unwrap();

        // Genre lookup "completed" without results, youtube errored.
        store.mark_done(Dimension::Genre, recorded.artist_id).unwrap();
        store.mark_error(Dimension::Youtube, recorded.track_id, "boom").unwrap();

        assert_eq!(store.requeue_artists_without_genres().unwrap(), 1);
        assert_eq!(store.requeue_tracks_without_youtube_code().unwrap(), 1);
        assert!(store.next_pending(Dimension::Genre).unwrap().is_some());
        assert!(store.next_pending(Dimension::Youtube).unwrap().is_some());

        // With results present, nothing is requeued.
        store.write_artist_genres(recorded.artist_id, &["idm".to_string()]).unwrap();
        store.mark_done(Dimension::Genre, recorded.artist_id).unwrap();
        store.write_youtube_code(recorded.track_id, "abc").unwrap();
        store.mark_done(Dimension::Youtube, recorded.track_id).unwrap();
        assert_eq!(store.requeue_artists_without_genres().unwrap(), 0);
        assert_eq!(store.requeue_tracks_without_youtube_code().unwrap(), 0);
    }
}
