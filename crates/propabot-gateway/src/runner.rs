//! The scheduled daily job: poster to the configured channel, then playlist.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serenity::http::Http;
use tracing::{info, warn};

use propabot_core::{ConfigStore, DeliveryTarget, PropagandaConfig};
use propabot_discord::{ChannelTarget, VoicePlayer};
use propabot_generation::{report_failure, ContentPipeline, PosterRequest};
use propabot_scheduler::{Firing, JobRunner, RunError};

/// REST client slot, filled once the Discord gateway is ready.
pub type HttpSlot = Arc<OnceLock<Arc<Http>>>;

pub const SCHEDULER_OWNER: &str = "scheduler";

pub struct DailyContentRunner {
    store: Arc<ConfigStore>,
    pipeline: Arc<ContentPipeline>,
    voice: Arc<VoicePlayer>,
    http: HttpSlot,
}

impl DailyContentRunner {
    pub fn new(
        store: Arc<ConfigStore>,
        pipeline: Arc<ContentPipeline>,
        voice: Arc<VoicePlayer>,
        http: HttpSlot,
    ) -> Self {
        Self {
            store,
            pipeline,
            voice,
            http,
        }
    }

    /// Start the playlist in the background. Playback outlives the run.
    async fn start_playlist(&self, channel_id: u64, url: &str) {
        let guild_id = match self.voice.guild_of(channel_id).await {
            Ok(g) => g,
            Err(e) => {
                warn!(channel_id, err = %e, "cannot resolve voice channel for playlist");
                return;
            }
        };
        match self.voice.begin(guild_id, channel_id, url, SCHEDULER_OWNER) {
            Ok(_playback) => info!(guild_id, channel_id, "playlist started"),
            Err(e) => warn!(guild_id, err = %e, "playlist not started"),
        }
    }
}

#[async_trait]
impl JobRunner for DailyContentRunner {
    async fn run(&self, firing: &Firing) -> Result<(), RunError> {
        let config = self.store.snapshot();
        let channel_id = config
            .channel_id
            .ok_or("no poster channel configured, use /set_channel")?;
        let http = self
            .http
            .get()
            .cloned()
            .ok_or("Discord is not connected")?;

        let target = ChannelTarget::new(http, channel_id);
        self.post_and_play(firing, &config, &target).await
    }
}

impl DailyContentRunner {
    /// Post the poster to `target`, reporting failures there, then start the
    /// playlist if one is configured.
    async fn post_and_play(
        &self,
        firing: &Firing,
        config: &PropagandaConfig,
        target: &dyn DeliveryTarget,
    ) -> Result<(), RunError> {
        let request = PosterRequest::from_config(config);
        match self.pipeline.generate_and_deliver(&request, target).await {
            Ok(outcome) => info!(
                run_id = %firing.run_id,
                kind = %firing.kind,
                attempts = outcome.attempts,
                "daily poster posted"
            ),
            Err(e) => {
                report_failure(target, &e).await;
                return Err(e.into());
            }
        }

        if let (Some(voice_channel), Some(url)) =
            (config.voice_channel_id, config.playlist_url.as_deref())
        {
            self.start_playlist(voice_channel, url).await;
        }
        Ok(())
    }
}
