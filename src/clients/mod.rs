//! HTTP and subprocess clients for the external collaborators.
//!
//! Every collaborator sits behind a trait so the pipeline can be driven by
//! stubs in tests. The production impls keep bounded timeouts per call and
//! treat transport failures as plain errors for the caller to classify.

mod lastfm;
mod nowplaying;
mod ytdlp;
mod ytmusic;

pub use lastfm::{GenreSource, LastfmClient};
pub use nowplaying::{HttpPlaybackSource, PlaybackSnapshot, PlaybackSource};
pub use ytdlp::{AudioFetcher, DownloadRequest, DownloadedAudio, FetchError, YtdlpFetcher};
pub use ytmusic::{YoutubeSource, YtmusicClient};
