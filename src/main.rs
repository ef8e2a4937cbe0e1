use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scrobblino_pipeline_server::chat::{ChatClient, ChatNotifier, WebhookChatClient};
use scrobblino_pipeline_server::clients::{
    HttpPlaybackSource, LastfmClient, PlaybackSource, YtdlpFetcher, YtmusicClient,
};
use scrobblino_pipeline_server::config::{AppConfig, CliConfig, FileConfig};
use scrobblino_pipeline_server::enrichment::{
    DownloadStage, GenreStage, WorkerPool, YoutubeStage,
};
use scrobblino_pipeline_server::library::{LibraryStore, SqliteLibraryStore};
use scrobblino_pipeline_server::notify::{
    NotificationRelay, SqliteNotifyConnector, ARTISTS_CHANNEL, TRACKS_CHANNEL, WORKFLOW_CHANNEL,
};
use scrobblino_pipeline_server::tracker::{PlayRecorder, PlaybackAccountant};
use scrobblino_pipeline_server::workflow::WorkflowStore;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum BackfillTarget {
    /// Re-queue artists whose genre lookup produced nothing.
    Genres,
    /// Re-queue tracks without a YouTube code.
    Youtube,
    /// Both of the above.
    All,
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite library database file.
    #[clap(value_parser = parse_path)]
    pub library_db: PathBuf,

    /// Path to a TOML config file; file values override CLI values.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory downloaded audio is placed in for import.
    #[clap(long, value_parser = parse_path)]
    pub import_dir: Option<PathBuf>,

    /// Root of the organized music library, checked before downloading.
    #[clap(long, value_parser = parse_path)]
    pub music_dir: Option<PathBuf>,

    /// Base URL of the local now-playing endpoint; enables the accountant.
    #[clap(long)]
    pub now_playing_url: Option<String>,

    /// Chat webhook URL; enables play announcements.
    #[clap(long)]
    pub chat_webhook_url: Option<String>,

    /// Last.fm API key; enables the genre worker pool.
    #[clap(long)]
    pub lastfm_api_key: Option<String>,

    /// Base URL of the YouTube Music search service; enables the resolver pool.
    #[clap(long)]
    pub ytmusic_url: Option<String>,

    /// Audio format passed to yt-dlp.
    #[clap(long, default_value = "flac")]
    pub audio_format: String,

    /// Run a one-shot backfill pass instead of the pipeline, then exit.
    #[clap(long, value_enum)]
    pub backfill: Option<BackfillTarget>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            library_db: Some(self.library_db.clone()),
            import_dir: self.import_dir.clone(),
            music_dir: self.music_dir.clone(),
            now_playing_url: self.now_playing_url.clone(),
            chat_webhook_url: self.chat_webhook_url.clone(),
            lastfm_api_key: self.lastfm_api_key.clone(),
            ytmusic_url: self.ytmusic_url.clone(),
            audio_format: self.audio_format.clone(),
        }
    }
}

fn run_backfill(store: &SqliteLibraryStore, target: BackfillTarget) -> Result<()> {
    if matches!(target, BackfillTarget::Genres | BackfillTarget::All) {
        let count = store.requeue_artists_without_genres()?;
        info!("Re-queued {} artists for genre lookup", count);
    }
    if matches!(target, BackfillTarget::Youtube | BackfillTarget::All) {
        let count = store.requeue_tracks_without_youtube_code()?;
        info!("Re-queued {} tracks for YouTube resolution", count);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Opening SQLite library database at {:?}...", config.library_db);
    let store = Arc::new(
        SqliteLibraryStore::new(&config.library_db).context("Failed to open library database")?,
    );

    if let Some(target) = cli_args.backfill {
        return run_backfill(&store, target);
    }

    let library: Arc<dyn LibraryStore> = store.clone();
    let workflows: Arc<dyn WorkflowStore> = store.clone();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let mut tasks = Vec::new();

    // Genre worker pool, nudged by artist-insert notifications.
    if let Some(api_key) = config.lastfm_api_key.clone() {
        let client = Arc::new(LastfmClient::new(config.lastfm_base_url.clone(), api_key));
        let stage = Arc::new(GenreStage::new(library.clone(), client));
        let pool = WorkerPool::new(
            stage,
            library.clone(),
            workflows.clone(),
            config.workers.pool_settings(config.workers.genre_workers),
        );
        let hint = pool.hint();
        let relay = NotificationRelay::new(
            SqliteNotifyConnector::new(config.library_db.clone()),
            ARTISTS_CHANNEL,
            config.relay.clone(),
        );
        tasks.push(tokio::spawn(relay.run(
            move |_payload| {
                let hint = hint.clone();
                async move {
                    hint.notify_one();
                }
            },
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(pool.run(shutdown.clone())));
    } else {
        info!("No Last.fm API key configured, genre enrichment disabled");
    }

    // YouTube resolver pool, nudged by track-insert notifications.
    if let Some(ytmusic_url) = config.ytmusic_url.clone() {
        let client = Arc::new(YtmusicClient::new(ytmusic_url));
        let stage = Arc::new(YoutubeStage::new(library.clone(), client));
        let pool = WorkerPool::new(
            stage,
            library.clone(),
            workflows.clone(),
            config.workers.pool_settings(config.workers.youtube_workers),
        );
        let hint = pool.hint();
        let relay = NotificationRelay::new(
            SqliteNotifyConnector::new(config.library_db.clone()),
            TRACKS_CHANNEL,
            config.relay.clone(),
        );
        tasks.push(tokio::spawn(relay.run(
            move |_payload| {
                let hint = hint.clone();
                async move {
                    hint.notify_one();
                }
            },
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(pool.run(shutdown.clone())));
    } else {
        info!("No YouTube Music search service configured, resolver disabled");
    }

    // Audio download pool; eligible items already carry a YouTube code.
    {
        let fetcher = Arc::new(YtdlpFetcher::new(
            config.import_dir.clone(),
            config.music_dir.clone(),
            config.audio_format.clone(),
        ));
        let stage = Arc::new(DownloadStage::new(library.clone(), fetcher));
        let pool = WorkerPool::new(
            stage,
            library.clone(),
            workflows.clone(),
            config.workers.pool_settings(config.workers.download_workers),
        );
        tasks.push(tokio::spawn(pool.run(shutdown.clone())));
    }

    // Chat notifier over the workflow channel.
    if let Some(webhook_url) = config.chat_webhook_url.clone() {
        let client: Arc<dyn ChatClient> = Arc::new(WebhookChatClient::new(webhook_url));
        let notifier = Arc::new(ChatNotifier::new(
            library.clone(),
            workflows.clone(),
            client,
            config.chat.strategy.clone(),
            shutdown.clone(),
        ));
        let relay = NotificationRelay::new(
            SqliteNotifyConnector::new(config.library_db.clone()),
            WORKFLOW_CHANNEL,
            config.relay.clone(),
        );
        tasks.push(tokio::spawn(relay.run(
            move |payload| {
                let notifier = notifier.clone();
                async move {
                    notifier.handle(payload).await;
                }
            },
            shutdown.clone(),
        )));
    } else {
        info!("No chat webhook configured, announcements disabled");
    }

    // Playback accountant.
    if let Some(now_playing_url) = config.now_playing_url.clone() {
        let source: Arc<dyn PlaybackSource> = Arc::new(HttpPlaybackSource::new(now_playing_url));
        let recorder = PlayRecorder::new(library.clone(), workflows.clone());
        let accountant = PlaybackAccountant::new(source, recorder, config.tracker.clone());
        tasks.push(tokio::spawn(accountant.run(shutdown.clone())));
    } else {
        warn!("No now-playing endpoint configured, play tracking disabled");
    }

    info!("Pipeline running with {} tasks", tasks.len());
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!("Pipeline task panicked: {}", e);
        }
    }
    info!("Pipeline stopped");
    Ok(())
}
