use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serenity::http::Http;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use propabot_core::{ConfigStore, ScheduleConfig, Settings};
use propabot_discord::{DiscordAdapter, DiscordAppContext, DiscordError, VoicePlayer};
use propabot_generation::ContentPipeline;
use propabot_presence::{PollerHandle, PresencePoller, SteamPresence};
use propabot_scheduler::{
    DailyScheduler, RunLedger, RunRecord, SchedulerError, SchedulerOptions, SystemClock,
};

use crate::runner::{DailyContentRunner, HttpSlot};

/// Lifecycle of the bot as reported by `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotStatus {
    NotStarted,
    Starting,
    Running,
    Error(String),
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotStatus::NotStarted => write!(f, "not started"),
            BotStatus::Starting => write!(f, "starting"),
            BotStatus::Running => write!(f, "running"),
            BotStatus::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Background tasks owned by a started bot.
struct Running {
    cancel: CancellationToken,
    discord: JoinHandle<()>,
    presence: Option<(PollerHandle, JoinHandle<()>)>,
}

/// Central shared state: passed as `Arc<AppState>` to Axum handlers and the
/// Discord event handler.
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<ConfigStore>,
    pub pipeline: Arc<ContentPipeline>,
    pub voice: Arc<VoicePlayer>,
    pub scheduler: DailyScheduler,
    pub http: HttpSlot,
    pub started_at: Instant,
    status: Mutex<BotStatus>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl AppState {
    /// Wire the daily scheduler to a [`DailyContentRunner`] sharing this
    /// state's store, pipeline and voice player.
    pub fn build(
        settings: Settings,
        store: Arc<ConfigStore>,
        pipeline: Arc<ContentPipeline>,
        voice: Arc<VoicePlayer>,
        ledger: RunLedger,
    ) -> Self {
        let http: HttpSlot = Arc::new(OnceLock::new());
        let runner = DailyContentRunner::new(
            Arc::clone(&store),
            Arc::clone(&pipeline),
            Arc::clone(&voice),
            Arc::clone(&http),
        );
        let scheduler = DailyScheduler::new(
            Arc::new(runner),
            Arc::new(SystemClock),
            ledger,
            SchedulerOptions::from(&settings.scheduler),
        );
        Self {
            settings,
            store,
            pipeline,
            voice,
            scheduler,
            http,
            started_at: Instant::now(),
            status: Mutex::new(BotStatus::NotStarted),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn status(&self) -> BotStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_status(&self, status: BotStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Start the bot unless it is already starting or running.
    ///
    /// Returns immediately; startup continues on a background task. A bot in
    /// the error state may be started again.
    pub fn start(self: &Arc<Self>) -> BotStatus {
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(*status, BotStatus::Starting | BotStatus::Running) {
                return status.clone();
            }
            *status = BotStatus::Starting;
        }

        let app = Arc::clone(self);
        tokio::spawn(async move {
            // Running is set by the gateway's ready event, not here.
            if let Err(e) = app.launch().await {
                error!(err = %e, "bot failed to start");
                app.set_status(BotStatus::Error(e.to_string()));
            }
        });
        BotStatus::Starting
    }

    /// The gateway reported ready. Moves a starting bot to running.
    fn mark_ready(&self) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == BotStatus::Starting {
            info!("bot running");
            *status = BotStatus::Running;
        }
    }

    /// Discord refused the bot. The adapter has already stopped.
    async fn fail(&self, err: DiscordError) {
        error!(err = %err, "Discord rejected the bot");
        self.scheduler.shutdown().await;
        self.set_status(BotStatus::Error(err.to_string()));
    }

    async fn launch(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            stop_tasks(previous).await;
        }

        let discord = self.settings.discord.as_ref().ok_or(DiscordError::NoToken)?;
        let adapter = DiscordAdapter::new(discord, Arc::clone(self))?;

        let config = self.store.snapshot();
        let next = self.scheduler.configure(config.schedule.clone())?;
        info!(schedule = %config.schedule, next = %next, "daily poster scheduled");

        let cancel = CancellationToken::new();
        let discord = {
            let app = Arc::clone(self);
            let token = cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = adapter.run(token).await {
                    app.fail(e).await;
                }
            })
        };
        let presence = self.spawn_presence(&config.watched_ids, &config.watched_app_id);

        *running = Some(Running {
            cancel,
            discord,
            presence,
        });
        Ok(())
    }

    fn spawn_presence(
        &self,
        watched_ids: &[String],
        app_id: &str,
    ) -> Option<(PollerHandle, JoinHandle<()>)> {
        if watched_ids.is_empty() {
            info!("no watched accounts, presence polling disabled");
            return None;
        }
        let Some(source) = SteamPresence::from_settings(&self.settings.presence, app_id) else {
            warn!("presence api_key not set, presence polling disabled");
            return None;
        };

        let (tx, rx) = mpsc::channel(32);
        let poller = PresencePoller::new(Arc::new(source), watched_ids.to_vec())
            .with_settings(&self.settings.presence)
            .spawn(tx);
        let router = tokio::spawn(crate::alerts::route_alerts(
            rx,
            Arc::clone(&self.store),
            Arc::clone(&self.voice),
        ));
        Some((poller, router))
    }

    /// Stop every background task and the daily trigger.
    pub async fn shutdown(&self) {
        if let Some(running) = self.running.lock().await.take() {
            stop_tasks(running).await;
        }
        self.scheduler.shutdown().await;
        self.set_status(BotStatus::NotStarted);
        info!("bot stopped");
    }
}

async fn stop_tasks(running: Running) {
    running.cancel.cancel();
    if let Some((poller, router)) = running.presence {
        poller.stop().await;
        if let Err(e) = router.await {
            warn!(err = %e, "alert router ended abnormally");
        }
    }
    if tokio::time::timeout(Duration::from_secs(10), running.discord)
        .await
        .is_err()
    {
        warn!("Discord adapter did not stop within 10s");
    }
}

#[async_trait::async_trait]
impl DiscordAppContext for AppState {
    fn store(&self) -> &ConfigStore {
        &self.store
    }

    fn pipeline(&self) -> &ContentPipeline {
        &self.pipeline
    }

    fn voice(&self) -> &VoicePlayer {
        &self.voice
    }

    fn reschedule(&self, schedule: ScheduleConfig) -> Result<DateTime<Utc>, SchedulerError> {
        self.scheduler.configure(schedule)
    }

    async fn history(&self, limit: usize) -> Result<Vec<RunRecord>, SchedulerError> {
        self.scheduler.ledger().recent(limit).await
    }

    fn discord_ready(&self, http: Arc<Http>) {
        if self.http.set(Arc::clone(&http)).is_ok() {
            info!("Discord REST client attached");
        }
        self.voice.attach_http(http);
        self.mark_ready();
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/status", get(crate::http::control::status_handler))
        .route("/start", post(crate::http::control::start_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
