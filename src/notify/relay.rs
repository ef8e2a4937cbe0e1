//! Reconnecting notification relay.
//!
//! Turns a notification channel into an effectively infinite stream of
//! decoded JSON payloads handed to a per-stage handler closure. One relay is
//! instantiated per consuming stage; each wraps its own database connection
//! and supervises it: bounded waits between polls, batch draining, fixed
//! backoff and a full re-subscribe on any connection error. The relay never
//! gives up and never mutates domain rows.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A raw, not-yet-decoded notification row.
#[derive(Debug, Clone)]
pub struct RawNotification {
    pub id: i64,
    pub payload: String,
}

/// A live subscription to one channel.
pub trait NotifyConnection: Send {
    /// Highest notification id currently on the channel; the subscribe
    /// cursor starts here so only events published afterwards are delivered.
    fn latest_id(&mut self) -> Result<i64>;

    /// All buffered notifications past the cursor, oldest first.
    fn fetch_after(&mut self, cursor: i64) -> Result<Vec<RawNotification>>;
}

/// Opens subscriptions; the relay reconnects through this after failures.
pub trait NotifyConnector: Send + Sync {
    type Conn: NotifyConnection;

    fn connect(&self, channel: &str) -> Result<Self::Conn>;
}

/// Timing policy for a relay loop.
#[derive(Debug, Clone)]
pub struct RelayPolicy {
    /// Pause between polls while the channel is quiet.
    pub poll_interval: Duration,
    /// How long to stay quiet before emitting a liveness heartbeat log.
    pub idle_log_after: Duration,
    /// Fixed pause before reconnecting after a connection error.
    pub reconnect_backoff: Duration,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            idle_log_after: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

/// Connector opening dedicated connections to the shared library database.
pub struct SqliteNotifyConnector {
    db_path: PathBuf,
}

impl SqliteNotifyConnector {
    pub fn new<P: Into<PathBuf>>(db_path: P) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

pub struct SqliteNotifyConnection {
    conn: Connection,
    channel: String,
}

impl NotifyConnection for SqliteNotifyConnection {
    fn latest_id(&mut self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(id), 0) FROM notifications WHERE channel = ?1",
                [&self.channel],
                |row| row.get(0),
            )
            .context("Failed to read channel cursor")
    }

    fn fetch_after(&mut self, cursor: i64) -> Result<Vec<RawNotification>> {
        let mut stmt = self.conn.prepare_cached(
            r#"SELECT id, payload FROM notifications
               WHERE channel = ?1 AND id > ?2
               ORDER BY id ASC"#,
        )?;
        let rows = stmt
            .query_map(rusqlite::params![self.channel, cursor], |row| {
                Ok(RawNotification {
                    id: row.get(0)?,
                    payload: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl NotifyConnector for SqliteNotifyConnector {
    type Conn = SqliteNotifyConnection;

    fn connect(&self, channel: &str) -> Result<Self::Conn> {
        // Opened read-write despite only reading: WAL databases want their
        // shared-memory file writable by every connection.
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )
        .with_context(|| format!("Failed to open notify connection to {:?}", self.db_path))?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Ok(SqliteNotifyConnection {
            conn,
            channel: channel.to_string(),
        })
    }
}

/// The reusable retrying supervisor: connect, subscribe, drain, handle,
/// back off, repeat.
pub struct NotificationRelay<C: NotifyConnector> {
    connector: C,
    channel: String,
    policy: RelayPolicy,
}

impl<C: NotifyConnector> NotificationRelay<C> {
    pub fn new(connector: C, channel: impl Into<String>, policy: RelayPolicy) -> Self {
        Self {
            connector,
            channel: channel.into(),
            policy,
        }
    }

    /// Run until shutdown, invoking `handler` for every decoded payload.
    ///
    /// Undecodable payloads are logged and dropped; they never stop the
    /// relay. Handler-internal failures are the handler's business (its
    /// output is `()`): one bad event must not stall the stream.
    pub async fn run<H, Fut>(self, handler: H, shutdown: CancellationToken)
    where
        H: Fn(Value) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut cursor: Option<i64> = None;

        'reconnect: loop {
            if shutdown.is_cancelled() {
                break;
            }

            let mut conn = match self.connector.connect(&self.channel) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to connect for channel {}: {:#}", self.channel, e);
                    if !sleep_unless_shutdown(self.policy.reconnect_backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            // The cursor survives reconnects: events published after the
            // original subscribe are delivered even across a connection drop.
            if cursor.is_none() {
                match conn.latest_id() {
                    Ok(id) => cursor = Some(id),
                    Err(e) => {
                        warn!("Failed to resolve cursor on {}: {:#}", self.channel, e);
                        if !sleep_unless_shutdown(self.policy.reconnect_backoff, &shutdown).await {
                            break;
                        }
                        continue;
                    }
                }
            }
            let mut position = cursor.unwrap_or(0);
            info!("Listening on channel {}", self.channel);

            let mut quiet_for = Duration::ZERO;
            loop {
                if shutdown.is_cancelled() {
                    break 'reconnect;
                }

                let batch = match conn.fetch_after(position) {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(
                            "Connection error on channel {}: {:#}, reconnecting in {:?}",
                            self.channel, e, self.policy.reconnect_backoff
                        );
                        if !sleep_unless_shutdown(self.policy.reconnect_backoff, &shutdown).await {
                            break 'reconnect;
                        }
                        continue 'reconnect;
                    }
                };

                if batch.is_empty() {
                    quiet_for += self.policy.poll_interval;
                    if quiet_for >= self.policy.idle_log_after {
                        debug!("Waiting for notifications on {}", self.channel);
                        quiet_for = Duration::ZERO;
                    }
                    if !sleep_unless_shutdown(self.policy.poll_interval, &shutdown).await {
                        break 'reconnect;
                    }
                    continue;
                }

                quiet_for = Duration::ZERO;
                for notification in batch {
                    position = notification.id;
                    cursor = Some(position);
                    match serde_json::from_str::<Value>(&notification.payload) {
                        Ok(payload) => handler(payload).await,
                        Err(e) => {
                            warn!(
                                "Invalid JSON payload on {} (id {}): {}",
                                self.channel, notification.id, e
                            );
                        }
                    }
                }
            }
        }

        info!("Relay for channel {} stopped", self.channel);
    }
}

/// Sleep cooperatively; false means shutdown fired first.
async fn sleep_unless_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.cancelled() => false,
    }
}
