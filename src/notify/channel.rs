//! Notification channels and payloads.
//!
//! A notification is a row in the `notifications` table. Publishing happens
//! inside the same transaction as the domain write it advertises, so a
//! consumer can always re-read the row state a notification refers to.
//! Delivery is at-least-once; payloads are hints, never proof of state.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Emitted when a new artist row is created.
pub const ARTISTS_CHANNEL: &str = "artists_inserted";
/// Emitted when a new track row is created.
pub const TRACKS_CHANNEL: &str = "tracks_inserted";
/// Emitted when a workflow record is created or one of its flags flips.
pub const WORKFLOW_CHANNEL: &str = "workflow_updated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistInsertedPayload {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackInsertedPayload {
    pub id: i64,
    pub title: String,
    pub artist_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowUpdatedPayload {
    pub workflow_id: String,
    #[serde(default)]
    pub init_done: bool,
    #[serde(default)]
    pub genre_done: bool,
    #[serde(default)]
    pub yt_done: bool,
}

/// Insert a notification row on `channel`. Callers pass the connection (or
/// transaction) of the domain write so both commit together.
pub fn publish<P: Serialize>(conn: &Connection, channel: &str, payload: &P) -> Result<()> {
    let payload = serde_json::to_string(payload).context("Failed to encode payload")?;
    conn.execute(
        "INSERT INTO notifications (channel, payload, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![channel, payload, chrono::Utc::now().timestamp()],
    )
    .with_context(|| format!("Failed to publish on channel {}", channel))?;
    Ok(())
}
