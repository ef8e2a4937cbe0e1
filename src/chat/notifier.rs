//! Workflow-gated play announcements.
//!
//! Consumes `workflow_updated` notifications. A play is announced once its
//! workflow carries every flag, and only if it was neither skipped nor a
//! repeat of the immediately preceding play. The payload is only a hint:
//! readiness is always re-read from the store before acting.

use crate::library::{LibraryStore, PlayAnnouncement};
use crate::notify::WorkflowUpdatedPayload;
use crate::workflow::{wait_ready, WorkflowStore, ALL_FLAGS};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub body: String,
    pub formatted_body: String,
}

/// Delivery boundary; formatting stays on this side, transport on the other.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send(&self, message: &ChatMessage) -> Result<()>;
}

/// POSTs Matrix-style message bodies to a webhook URL.
pub struct WebhookChatClient {
    client: reqwest::Client,
    url: String,
}

impl WebhookChatClient {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, url }
    }
}

#[async_trait]
impl ChatClient for WebhookChatClient {
    async fn send(&self, message: &ChatMessage) -> Result<()> {
        let body = json!({
            "msgtype": "m.text",
            "body": message.body,
            "format": "org.matrix.custom.html",
            "formatted_body": message.formatted_body,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("Failed to reach chat webhook")?;
        if !response.status().is_success() {
            bail!("Chat webhook returned status {}", response.status());
        }
        Ok(())
    }
}

/// How the notifier waits for an incomplete workflow.
#[derive(Debug, Clone)]
pub enum GateStrategy {
    /// Return early and trust the re-notification published by the stage
    /// that completes last.
    Defer,
    /// Block inside the handler, re-polling readiness.
    Block { poll_interval: Duration },
}

pub struct ChatNotifier {
    store: Arc<dyn LibraryStore>,
    workflows: Arc<dyn WorkflowStore>,
    client: Arc<dyn ChatClient>,
    strategy: GateStrategy,
    shutdown: CancellationToken,
    /// Highest play id already announced. Notifications are at-least-once
    /// and several may pass the gate for one play; posting stays
    /// effectively-once within this process.
    last_announced: AtomicI64,
}

impl ChatNotifier {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        workflows: Arc<dyn WorkflowStore>,
        client: Arc<dyn ChatClient>,
        strategy: GateStrategy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            workflows,
            client,
            strategy,
            shutdown,
            last_announced: AtomicI64::new(0),
        }
    }

    /// Relay handler entry point. Failures are logged, never propagated:
    /// one bad notification must not stall the channel.
    pub async fn handle(&self, payload: Value) {
        let payload: WorkflowUpdatedPayload = match serde_json::from_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Malformed workflow payload, dropping: {}", e);
                return;
            }
        };
        if let Err(e) = self.process(&payload).await {
            error!(
                "Failed to process workflow {}: {:#}",
                payload.workflow_id, e
            );
        }
    }

    async fn process(&self, payload: &WorkflowUpdatedPayload) -> Result<()> {
        match &self.strategy {
            GateStrategy::Defer => {
                if !self.workflows.is_ready(&payload.workflow_id, ALL_FLAGS)? {
                    debug!(
                        "Workflow {} not complete yet, waiting for re-notification",
                        payload.workflow_id
                    );
                    return Ok(());
                }
            }
            GateStrategy::Block { poll_interval } => {
                let ready = wait_ready(
                    self.workflows.as_ref(),
                    &payload.workflow_id,
                    ALL_FLAGS,
                    *poll_interval,
                    &self.shutdown,
                )
                .await?;
                if !ready {
                    return Ok(());
                }
            }
        }

        let Some(play) = self.store.get_announcement(&payload.workflow_id)? else {
            debug!("No play found for workflow {}", payload.workflow_id);
            return Ok(());
        };
        if play.play_id <= self.last_announced.load(Ordering::SeqCst) {
            debug!("Play {} already announced", play.play_id);
            return Ok(());
        }
        let previous = self.store.get_previous_announcement(play.play_id)?;

        if play.skipped {
            info!("Not posting {} - {}: skipped", play.artist, play.title);
            return Ok(());
        }
        if let Some(previous) = &previous {
            if previous.artist == play.artist && previous.title == play.title {
                info!("Not posting {} - {}: repeat", play.artist, play.title);
                return Ok(());
            }
        }

        let message = build_message(&play);
        self.client
            .send(&message)
            .await
            .context("Failed to deliver chat message")?;
        self.last_announced.store(play.play_id, Ordering::SeqCst);
        info!("Posted play of {} - {}", play.artist, play.title);
        Ok(())
    }
}

/// Plain and HTML bodies for one announcement.
pub fn build_message(play: &PlayAnnouncement) -> ChatMessage {
    let genre_list = play.genres.join(", ");
    let label = format!("{} - {}", play.artist, play.title);

    let formatted_title = match &play.youtube_code {
        Some(code) => format!(
            "<a href=\"https://music.youtube.com/watch?v={}\">{}</a>",
            code, label
        ),
        None => label.clone(),
    };

    ChatMessage {
        body: format!("Title: {}\nGenre: {}", label, genre_list),
        formatted_body: format!(
            "<strong>Title:</strong> {}<br><strong>Genre:</strong> {}<br><hr>",
            formatted_title, genre_list
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{NewPlay, SqliteLibraryStore};
    use crate::workflow::WorkflowFlag;
    use std::sync::Mutex;

    struct CapturingChatClient {
        sent: Mutex<Vec<ChatMessage>>,
    }

    impl CapturingChatClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatClient for CapturingChatClient {
        async fn send(&self, message: &ChatMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<SqliteLibraryStore>,
        client: Arc<CapturingChatClient>,
        notifier: ChatNotifier,
    }

    fn fixture(strategy: GateStrategy) -> Fixture {
        let store = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let client = CapturingChatClient::new();
        let notifier = ChatNotifier::new(
            store.clone(),
            store.clone(),
            client.clone(),
            strategy,
            CancellationToken::new(),
        );
        Fixture {
            store,
            client,
            notifier,
        }
    }

    /// Record a play and flip the given flags, returning the workflow id.
    fn seed_play(
        store: &Arc<SqliteLibraryStore>,
        artist: &str,
        title: &str,
        skipped: bool,
        flags: &[WorkflowFlag],
        played_at: i64,
    ) -> String {
        let workflow_id = store.create_workflow(&[]).unwrap();
        store
            .record_play(NewPlay {
                artist: artist.to_string(),
                album: String::new(),
                title: title.to_string(),
                duration_ms: 200_000,
                played_at,
                skipped,
                workflow_id: workflow_id.clone(),
            })
            .unwrap();
        for flag in flags {
            store.set_flag(&workflow_id, *flag).unwrap();
        }
        workflow_id
    }

    fn payload(workflow_id: &str) -> Value {
        json!({"workflow_id": workflow_id})
    }

    #[tokio::test]
    async fn test_posts_when_workflow_complete() {
        let f = fixture(GateStrategy::Defer);
        let id = seed_play(&f.store, "Plaid", "Eyen", false, ALL_FLAGS, 1000);
        let track_id: i64 = {
            let conn = f.store.connection().lock().unwrap();
            conn.query_row("SELECT id FROM tracks WHERE title = 'Eyen'", [], |row| {
                row.get(0)
            })
            .unwrap()
        };
        f.store.write_youtube_code(track_id, "abc123").unwrap();

        f.notifier.handle(payload(&id)).await;

        assert_eq!(f.client.count(), 1);
        let sent = f.client.sent.lock().unwrap();
        assert!(sent[0].body.contains("Plaid - Eyen"));
        assert!(sent[0].formatted_body.contains("music.youtube.com/watch?v=abc123"));
    }

    #[tokio::test]
    async fn test_defers_on_incomplete_workflow() {
        let f = fixture(GateStrategy::Defer);
        let id = seed_play(
            &f.store,
            "Plaid",
            "Eyen",
            false,
            &[WorkflowFlag::Init, WorkflowFlag::Genre],
            1000,
        );

        f.notifier.handle(payload(&id)).await;
        assert_eq!(f.client.count(), 0);

        // The last stage completes and re-notifies; now it posts.
        f.store.set_flag(&id, WorkflowFlag::Youtube).unwrap();
        f.notifier.handle(payload(&id)).await;
        assert_eq!(f.client.count(), 1);
    }

    #[tokio::test]
    async fn test_block_strategy_waits_for_flags() {
        let f = fixture(GateStrategy::Block {
            poll_interval: Duration::from_millis(5),
        });
        let id = seed_play(
            &f.store,
            "Plaid",
            "Eyen",
            false,
            &[WorkflowFlag::Init, WorkflowFlag::Genre],
            1000,
        );

        let store = f.store.clone();
        let flag_id = id.clone();
        let setter = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            store.set_flag(&flag_id, WorkflowFlag::Youtube).unwrap();
        });

        f.notifier.handle(payload(&id)).await;
        setter.await.unwrap();
        assert_eq!(f.client.count(), 1);
    }

    #[tokio::test]
    async fn test_suppresses_skipped_play() {
        let f = fixture(GateStrategy::Defer);
        let id = seed_play(&f.store, "Plaid", "Eyen", true, ALL_FLAGS, 1000);

        f.notifier.handle(payload(&id)).await;
        assert_eq!(f.client.count(), 0);
    }

    #[tokio::test]
    async fn test_suppresses_repeat_play() {
        let f = fixture(GateStrategy::Defer);
        seed_play(&f.store, "Plaid", "Eyen", false, ALL_FLAGS, 1000);
        let second = seed_play(&f.store, "Plaid", "Eyen", false, ALL_FLAGS, 2000);

        f.notifier.handle(payload(&second)).await;
        assert_eq!(f.client.count(), 0);
    }

    #[tokio::test]
    async fn test_drops_payload_without_identity() {
        let f = fixture(GateStrategy::Defer);
        f.notifier.handle(json!({"init_done": true})).await;
        f.notifier.handle(json!("not an object")).await;
        assert_eq!(f.client.count(), 0);
    }

    #[test]
    fn test_build_message_without_code() {
        let message = build_message(&PlayAnnouncement {
            play_id: 1,
            artist: "Plaid".to_string(),
            title: "Eyen".to_string(),
            genres: vec!["idm".to_string(), "electronic".to_string()],
            skipped: false,
            youtube_code: None,
        });
        assert_eq!(message.body, "Title: Plaid - Eyen\nGenre: idm, electronic");
        assert!(!message.formatted_body.contains("<a href"));
    }
}
