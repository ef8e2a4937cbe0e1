//! Scrobblino Pipeline Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod chat;
pub mod clients;
pub mod config;
pub mod enrichment;
pub mod library;
pub mod notify;
pub mod sqlite_persistence;
pub mod tracker;
pub mod workflow;

// Re-export commonly used types for convenience
pub use chat::{ChatClient, ChatNotifier, GateStrategy};
pub use clients::{PlaybackSnapshot, PlaybackSource};
pub use config::{AppConfig, CliConfig};
pub use enrichment::{EnrichmentStage, WorkerPool};
pub use library::{Dimension, LibraryStore, SqliteLibraryStore};
pub use notify::{NotificationRelay, RelayPolicy, SqliteNotifyConnector};
pub use tracker::{PlayRecorder, PlaybackAccountant};
pub use workflow::{WorkflowFlag, WorkflowStore};
