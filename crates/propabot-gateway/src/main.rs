use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use propabot_core::{ConfigStore, Settings};
use propabot_discord::{CommandPlayer, VoicePlayer};
use propabot_generation::{
    ChatTextGenerator, ContentPipeline, JobPoller, PassThrough, TextGenerator,
};
use propabot_scheduler::RunLedger;

mod alerts;
mod app;
mod http;
mod runner;

#[derive(Parser, Debug)]
#[command(name = "propabot-gateway", version, about = "Daily propaganda poster bot for Discord")]
struct Cli {
    /// Settings file (default: $PROPABOT_SETTINGS, then ~/.propabot/propabot.toml).
    #[arg(short, long)]
    settings: Option<String>,

    /// Wait for `POST /start` instead of starting the bot right away.
    #[arg(long)]
    no_autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "propabot_gateway=info,propabot_discord=info,propabot_generation=info,\
                 propabot_scheduler=info,propabot_presence=info,propabot_core=info,\
                 tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // settings: --settings > PROPABOT_SETTINGS env > ~/.propabot/propabot.toml
    let settings_path = cli
        .settings
        .clone()
        .or_else(|| std::env::var("PROPABOT_SETTINGS").ok());
    let settings = Settings::load(settings_path.as_deref()).unwrap_or_else(|e| {
        warn!("Settings load failed ({}), using defaults", e);
        Settings::default()
    });

    let store = Arc::new(ConfigStore::load(&settings.bot.config_path)?);
    info!(path = %settings.bot.config_path, "bot configuration loaded");

    info!(path = %settings.database.path, "opening run ledger");
    let ledger = RunLedger::open(&settings.database.path)?;

    let text: Arc<dyn TextGenerator> = match &settings.text {
        Some(provider) => Arc::new(ChatTextGenerator::from_settings(provider)),
        None => {
            info!("no text provider configured, prompts are used as slogans verbatim");
            Arc::new(PassThrough)
        }
    };
    let images = JobPoller::from_settings(&settings.image, settings.bot.temp_dir.as_deref());
    let pipeline = Arc::new(ContentPipeline::new(text, Arc::new(images)));

    if settings.audio.player_command.is_empty() {
        warn!("audio.player_command is empty, voice playback disabled");
    }
    let voice = Arc::new(VoicePlayer::new(Arc::new(CommandPlayer::new(
        settings.audio.player_command.clone(),
    ))));

    let addr: SocketAddr = format!("{}:{}", settings.gateway.bind, settings.gateway.port).parse()?;
    let autostart = settings.gateway.autostart && !cli.no_autostart;

    let state = Arc::new(app::AppState::build(
        settings, store, pipeline, voice, ledger,
    ));
    let router = app::build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Propabot gateway listening on {}", addr);

    if autostart {
        info!(status = %state.start(), "autostart");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if tokio::time::timeout(Duration::from_secs(15), state.shutdown())
        .await
        .is_err()
    {
        warn!("shutdown timed out");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
