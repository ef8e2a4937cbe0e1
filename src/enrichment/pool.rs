//! Generic worker pool running one enrichment stage.

use super::EnrichmentStage;
use crate::library::{Dimension, LibraryStore, WorkItem};
use crate::workflow::{WorkflowFlag, WorkflowStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerPoolSettings {
    pub workers: usize,
    /// Pause when the queue is empty or a claim race was lost.
    pub poll_interval: Duration,
    /// Pause after a failed item, so one broken collaborator cannot spin.
    pub penalty_interval: Duration,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(5),
            penalty_interval: Duration::from_secs(2),
        }
    }
}

/// The workflow flag a completed dimension flips, if any.
fn workflow_flag_for(dimension: Dimension) -> Option<WorkflowFlag> {
    match dimension {
        Dimension::Genre => Some(WorkflowFlag::Genre),
        Dimension::Youtube => Some(WorkflowFlag::Youtube),
        Dimension::Download => None,
    }
}

/// N independent workers over one stage.
pub struct WorkerPool<S: EnrichmentStage> {
    stage: Arc<S>,
    store: Arc<dyn LibraryStore>,
    workflows: Arc<dyn WorkflowStore>,
    settings: WorkerPoolSettings,
    /// Woken by insert notifications; purely a latency hint, the workers
    /// poll regardless.
    hint: Arc<Notify>,
}

impl<S: EnrichmentStage> WorkerPool<S> {
    pub fn new(
        stage: Arc<S>,
        store: Arc<dyn LibraryStore>,
        workflows: Arc<dyn WorkflowStore>,
        settings: WorkerPoolSettings,
    ) -> Self {
        Self {
            stage,
            store,
            workflows,
            settings,
            hint: Arc::new(Notify::new()),
        }
    }

    /// Handle used to nudge idle workers when new items land.
    pub fn hint(&self) -> Arc<Notify> {
        self.hint.clone()
    }

    /// Run all workers until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        let dimension = self.stage.dimension();
        info!(
            "Starting {} pool with {} workers",
            dimension, self.settings.workers
        );

        let mut handles = Vec::with_capacity(self.settings.workers);
        for worker_id in 0..self.settings.workers {
            let worker = Worker {
                stage: self.stage.clone(),
                store: self.store.clone(),
                workflows: self.workflows.clone(),
                settings: self.settings.clone(),
                hint: self.hint.clone(),
            };
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.run(worker_id, shutdown).await
            }));
        }
        futures::future::join_all(handles).await;

        info!("{} pool stopped", dimension);
    }
}

struct Worker<S: EnrichmentStage> {
    stage: Arc<S>,
    store: Arc<dyn LibraryStore>,
    workflows: Arc<dyn WorkflowStore>,
    settings: WorkerPoolSettings,
    hint: Arc<Notify>,
}

impl<S: EnrichmentStage> Worker<S> {
    async fn run(&self, worker_id: usize, shutdown: CancellationToken) {
        let dimension = self.stage.dimension();
        debug!("[{} worker {}] started", dimension, worker_id);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let item = match self.store.next_pending(dimension) {
                Ok(Some(item)) => item,
                Ok(None) => {
                    if !self.idle_sleep(&shutdown).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("[{} worker {}] queue read failed: {:#}", dimension, worker_id, e);
                    if !self.penalty_sleep(&shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            match self.store.try_claim(dimension, item.id) {
                Ok(true) => {}
                Ok(false) => {
                    // Someone else got there first; go back to the queue
                    // rather than chasing this item.
                    debug!("[{} worker {}] item {} already claimed", dimension, worker_id, item.id);
                    if !self.idle_sleep(&shutdown).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("[{} worker {}] claim failed: {:#}", dimension, worker_id, e);
                    if !self.penalty_sleep(&shutdown).await {
                        break;
                    }
                    continue;
                }
            }

            info!(
                "[{} worker {}] processing item {} ({})",
                dimension, worker_id, item.id, item.artist
            );
            self.process_claimed(worker_id, &item, &shutdown).await;
        }

        debug!("[{} worker {}] stopped", dimension, worker_id);
    }

    async fn process_claimed(&self, worker_id: usize, item: &WorkItem, shutdown: &CancellationToken) {
        let dimension = self.stage.dimension();
        match self.stage.enrich(item).await {
            Ok(Some(output)) => match self.stage.persist(item, output) {
                Ok(()) => self.finish(item),
                Err(e) => {
                    // The collaborator succeeded but the result could not be
                    // stored. The item stays `loading`, visible to an
                    // operator, rather than being retried with a second
                    // collaborator call.
                    error!(
                        "[{} worker {}] failed to persist result for item {}, leaving it in progress: {:#}",
                        dimension, worker_id, item.id, e
                    );
                    self.penalty_sleep(shutdown).await;
                }
            },
            Ok(None) => {
                info!(
                    "[{} worker {}] no result for item {}, marking done",
                    dimension, worker_id, item.id
                );
                self.finish(item);
            }
            Err(e) => {
                warn!(
                    "[{} worker {}] enrichment failed for item {}: {:#}",
                    dimension, worker_id, item.id, e
                );
                if let Err(mark_err) = self.store.mark_error(dimension, item.id, &format!("{:#}", e))
                {
                    error!(
                        "[{} worker {}] failed to mark item {} as errored: {:#}",
                        dimension, worker_id, item.id, mark_err
                    );
                }
                self.penalty_sleep(shutdown).await;
            }
        }
    }

    /// Terminal success path: mark done, then flip the owning workflow flag.
    fn finish(&self, item: &WorkItem) {
        let dimension = self.stage.dimension();
        if let Err(e) = self.store.mark_done(dimension, item.id) {
            error!("Failed to mark {} item {} done: {:#}", dimension, item.id, e);
            return;
        }
        if let (Some(flag), Some(workflow_id)) =
            (workflow_flag_for(dimension), item.workflow_id.as_deref())
        {
            if let Err(e) = self.workflows.set_flag(workflow_id, flag) {
                error!(
                    "Failed to set {} on workflow {}: {:#}",
                    flag, workflow_id, e
                );
            }
        }
    }

    async fn idle_sleep(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.poll_interval) => true,
            _ = self.hint.notified() => true,
            _ = shutdown.cancelled() => false,
        }
    }

    async fn penalty_sleep(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.penalty_interval) => true,
            _ = shutdown.cancelled() => false,
        }
    }
}
