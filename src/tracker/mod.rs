//! Playback tracking: sessions, skip classification and play recording.
//!
//! The accountant turns the noisy stream of now-playing polls into discrete
//! play records. All session state lives in a map owned by the single
//! accountant task; nothing here is shared across threads.

mod accountant;
mod session;

pub use accountant::{PlayRecorder, PlaybackAccountant, TrackerSettings};
pub use session::{
    FinalizedPlay, PlaybackSession, SessionKey, TrackInfo, LOOP_TOLERANCE, MIN_PLAYTIME_MS,
    MIN_SKIP_MS, SKIP_THRESHOLD,
};
