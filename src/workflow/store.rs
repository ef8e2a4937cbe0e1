//! SQLite implementation of the workflow store, plus the blocking-wait gate.

use super::{WorkflowFlag, WorkflowRecord, WorkflowStore};
use crate::library::SqliteLibraryStore;
use crate::notify::{publish, WorkflowUpdatedPayload, WORKFLOW_CHANNEL};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

fn read_record(conn: &Connection, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
    let record = conn
        .query_row(
            r#"SELECT workflow_id, init_done, genre_done, yt_done, created_at
               FROM workflow_state WHERE workflow_id = ?1"#,
            [workflow_id],
            |row| {
                Ok(WorkflowRecord {
                    workflow_id: row.get(0)?,
                    init_done: row.get(1)?,
                    genre_done: row.get(2)?,
                    yt_done: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

fn publish_record(conn: &Connection, record: &WorkflowRecord) -> Result<()> {
    publish(
        conn,
        WORKFLOW_CHANNEL,
        &WorkflowUpdatedPayload {
            workflow_id: record.workflow_id.clone(),
            init_done: record.init_done,
            genre_done: record.genre_done,
            yt_done: record.yt_done,
        },
    )
}

impl WorkflowStore for SqliteLibraryStore {
    fn create_workflow(&self, pre_set: &[WorkflowFlag]) -> Result<String> {
        let workflow_id = Uuid::new_v4().to_string();
        let mut guard = self.connection().lock().unwrap();
        let tx = guard.transaction()?;
        tx.execute(
            r#"INSERT INTO workflow_state (workflow_id, init_done, genre_done, yt_done, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            rusqlite::params![
                workflow_id,
                pre_set.contains(&WorkflowFlag::Init),
                pre_set.contains(&WorkflowFlag::Genre),
                pre_set.contains(&WorkflowFlag::Youtube),
                chrono::Utc::now().timestamp(),
            ],
        )?;
        if let Some(record) = read_record(&tx, &workflow_id)? {
            publish_record(&tx, &record)?;
        }
        tx.commit()?;
        debug!("Created workflow {}", workflow_id);
        Ok(workflow_id)
    }

    fn set_flag(&self, workflow_id: &str, flag: WorkflowFlag) -> Result<()> {
        let mut guard = self.connection().lock().unwrap();
        let tx = guard.transaction()?;
        // The WHERE guard makes a repeated set a no-op and confines the
        // published notification to the actual false → true transition.
        let changed = tx.execute(
            &format!(
                "UPDATE workflow_state SET {} = 1 WHERE workflow_id = ?1 AND {} = 0",
                flag.column(),
                flag.column()
            ),
            [workflow_id],
        )?;
        if changed == 1 {
            if let Some(record) = read_record(&tx, workflow_id)? {
                publish_record(&tx, &record)?;
            }
        } else {
            debug!("No workflow row updated setting {} on {}", flag, workflow_id);
        }
        tx.commit()?;
        Ok(())
    }

    fn get_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        let conn = self.connection().lock().unwrap();
        read_record(&conn, workflow_id)
    }

    fn is_ready(&self, workflow_id: &str, required: &[WorkflowFlag]) -> Result<bool> {
        Ok(self
            .get_workflow(workflow_id)?
            .map(|record| record.is_ready(required))
            .unwrap_or(false))
    }
}

/// Block until a workflow is ready, polling at `poll_interval`.
///
/// Returns false when the shutdown token fires first. Each cycle is a single
/// cooperative sleep; nothing leaks however long the workflow takes.
pub async fn wait_ready(
    store: &dyn WorkflowStore,
    workflow_id: &str,
    required: &[WorkflowFlag],
    poll_interval: Duration,
    shutdown: &CancellationToken,
) -> Result<bool> {
    loop {
        if store.is_ready(workflow_id, required)? {
            return Ok(true);
        }
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.cancelled() => return Ok(false),
        }
    }
}
