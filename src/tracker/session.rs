//! Per-session playback state machine and skip classification.

use tracing::debug;

/// A play counts as complete once this fraction of the track was heard.
pub const SKIP_THRESHOLD: f64 = 0.9;
/// Absolute unplayed-tail tolerance for very short tracks.
pub const MIN_SKIP_MS: i64 = 5_000;
/// Sessions accumulating less than this are dropped, not recorded.
pub const MIN_PLAYTIME_MS: i64 = 100;
/// A position rewind within this fraction of the duration is a loop.
pub const LOOP_TOLERANCE: f64 = 0.15;

/// One playback transport: a (listener, device) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub listener_id: String,
    pub device_id: String,
}

#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub duration_ms: i64,
}

impl TrackInfo {
    /// Identity used for track-change detection.
    pub fn track_key(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// A finalized, classification-complete play.
#[derive(Debug, Clone)]
pub struct FinalizedPlay {
    pub track: TrackInfo,
    pub started_at_ms: i64,
    pub accumulated_ms: i64,
    pub skipped: bool,
}

/// A contiguous observed listening interval for one track.
#[derive(Debug)]
pub struct PlaybackSession {
    track: TrackInfo,
    accumulated_ms: i64,
    started_at_ms: i64,
    last_position_ms: i64,
}

impl PlaybackSession {
    pub fn start(track: TrackInfo, position_ms: i64, now_ms: i64) -> Self {
        Self {
            track,
            accumulated_ms: 0,
            started_at_ms: now_ms,
            last_position_ms: position_ms,
        }
    }

    pub fn track_key(&self) -> String {
        self.track.track_key()
    }

    /// Same-track observation. Accumulates forward progress while playing;
    /// a position rewind of roughly one full duration finalizes the session
    /// and restarts it at the new position (the track looped).
    pub fn observe(
        &mut self,
        position_ms: i64,
        playing: bool,
        now_ms: i64,
    ) -> Option<FinalizedPlay> {
        if self.is_loop_restart(position_ms) {
            let fresh = Self::start(self.track.clone(), position_ms, now_ms);
            let finished = std::mem::replace(self, fresh);
            return finished.finalize(now_ms);
        }

        if playing {
            self.accumulated_ms += (position_ms - self.last_position_ms).max(0);
        }
        self.last_position_ms = position_ms;
        None
    }

    fn is_loop_restart(&self, position_ms: i64) -> bool {
        let rewind = self.last_position_ms - position_ms;
        if rewind <= 0 || self.track.duration_ms <= 0 {
            return false;
        }
        let tolerance = self.track.duration_ms as f64 * LOOP_TOLERANCE;
        ((rewind - self.track.duration_ms).abs() as f64) <= tolerance
    }

    /// End the session and classify it. Returns None for sessions too short
    /// to count (rapid skipping produces many of those).
    pub fn finalize(self, now_ms: i64) -> Option<FinalizedPlay> {
        if self.accumulated_ms < MIN_PLAYTIME_MS {
            debug!(
                "Playtime below threshold, dropping session of {} ({}ms)",
                self.track.track_key(),
                self.accumulated_ms
            );
            return None;
        }
        let duration = self.track.duration_ms;
        if duration <= 0 {
            return None;
        }

        let ratio = self.accumulated_ms as f64 / duration as f64;
        let mut skipped = if duration as f64 * (1.0 - SKIP_THRESHOLD) <= MIN_SKIP_MS as f64 {
            // Short track: the ratio is too coarse, compare the unplayed
            // tail against the absolute tolerance instead.
            duration - self.accumulated_ms > MIN_SKIP_MS
        } else {
            ratio < SKIP_THRESHOLD
        };

        if !skipped && (now_ms - self.started_at_ms) < (duration as f64 * SKIP_THRESHOLD) as i64 {
            // Enough playtime accumulated but not enough wall clock has
            // passed: the track ended prematurely (external stop).
            debug!(
                "Early end for {}, overriding to skipped",
                self.track.track_key()
            );
            skipped = true;
        }

        Some(FinalizedPlay {
            started_at_ms: self.started_at_ms,
            accumulated_ms: self.accumulated_ms,
            skipped,
            track: self.track,
        })
    }
}
