//! Claim-based enrichment worker pools.
//!
//! Each stage is a pool of identical workers that poll a work-queue view,
//! claim items through the store's conditional status transition, call the
//! stage's collaborator and record a terminal status. Workers coordinate
//! through the database only; losing a claim race is normal, not an error.

mod download;
mod genre;
mod pool;
mod youtube;

pub use download::DownloadStage;
pub use genre::GenreStage;
pub use pool::{WorkerPool, WorkerPoolSettings};
pub use youtube::YoutubeStage;

use crate::library::WorkItem;
use anyhow::Result;
use async_trait::async_trait;

/// One enrichment stage: the collaborator call plus the result write.
///
/// `enrich` talks to the outside world and returns `Ok(None)` when the
/// collaborator legitimately has nothing for this item (a completed no-op,
/// so the item is not retried forever). `persist` only touches the library.
/// The split matters for failure handling: a failed `enrich` marks the item
/// `error`, a failed `persist` leaves it `loading` for an operator.
#[async_trait]
pub trait EnrichmentStage: Send + Sync + 'static {
    type Output: Send;

    fn dimension(&self) -> crate::library::Dimension;

    async fn enrich(&self, item: &WorkItem) -> Result<Option<Self::Output>>;

    fn persist(&self, item: &WorkItem, output: Self::Output) -> Result<()>;
}
