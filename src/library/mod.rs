//! Library catalog: artists, tracks, plays and their enrichment state.
//!
//! The library database is the single shared resource of the pipeline. Every
//! cross-stage handoff goes through it: enrichment status columns act as the
//! work queue, the workflow table gates downstream consumers, and the
//! notifications table carries wake-up events.

mod models;
mod schema;
mod store;

pub use models::{
    Dimension, EnrichmentStatus, KnownItemState, NewPlay, PlayAnnouncement, RecordedPlay, WorkItem,
};
pub use schema::LIBRARY_VERSIONED_SCHEMAS;
pub use store::{LibraryStore, SqliteLibraryStore};
