//! Data models for the library catalog and its enrichment pipeline.

/// Enrichment state of an item for one dimension.
///
/// The status column is the concurrency control: a worker owns an item for a
/// dimension iff it won the `none` → `loading` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentStatus {
    None,
    Loading,
    Done,
    Error,
}

impl EnrichmentStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::None => "none",
            EnrichmentStatus::Loading => "loading",
            EnrichmentStatus::Done => "done",
            EnrichmentStatus::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> EnrichmentStatus {
        match s {
            "loading" => EnrichmentStatus::Loading,
            "done" => EnrichmentStatus::Done,
            "error" => EnrichmentStatus::Error,
            _ => EnrichmentStatus::None,
        }
    }

    /// Terminal states are never revisited by the worker pools.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrichmentStatus::Done | EnrichmentStatus::Error)
    }
}

/// An enrichment dimension. Genre applies to artists, the other two to tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Genre,
    Youtube,
    Download,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Genre => "genre",
            Dimension::Youtube => "youtube",
            Dimension::Download => "download",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A play observed by the accountant, ready to be recorded.
#[derive(Debug, Clone)]
pub struct NewPlay {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub duration_ms: i64,
    /// Unix millis at which the play started.
    pub played_at: i64,
    pub skipped: bool,
    pub workflow_id: String,
}

/// Result of recording a play: which rows were created along the way.
#[derive(Debug, Clone)]
pub struct RecordedPlay {
    /// None when the (track, played_at) pair was already recorded.
    pub play_id: Option<i64>,
    pub artist_id: i64,
    pub track_id: i64,
    pub artist_created: bool,
    pub track_created: bool,
}

/// The next eligible item of a work-queue view, as handed to a worker.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: i64,
    pub artist: String,
    /// Track title; absent for artist-level dimensions.
    pub title: Option<String>,
    pub youtube_code: Option<String>,
    pub workflow_id: Option<String>,
}

/// Enrichment state of already-known catalog rows, used to pre-set workflow
/// flags for stages that will not run for a given play.
#[derive(Debug, Clone, Default)]
pub struct KnownItemState {
    /// None when no artist row with that name exists yet.
    pub artist_genre_status: Option<EnrichmentStatus>,
    /// None when no track row with that (artist, title) exists yet.
    pub track_youtube_status: Option<EnrichmentStatus>,
}

/// A play hydrated with everything the chat notifier needs.
#[derive(Debug, Clone)]
pub struct PlayAnnouncement {
    pub play_id: i64,
    pub artist: String,
    pub title: String,
    pub genres: Vec<String>,
    pub skipped: bool,
    pub youtube_code: Option<String>,
}
