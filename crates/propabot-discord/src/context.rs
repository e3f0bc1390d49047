//! What the Discord layer needs from the application.
//!
//! Implemented by the gateway's `AppState`; keeping it a trait lets this
//! crate stay independent of how the scheduler and voice player are owned.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::http::Http;

use propabot_core::{ConfigStore, ScheduleConfig};
use propabot_generation::ContentPipeline;
use propabot_scheduler::{RunRecord, SchedulerError};

use crate::voice::VoicePlayer;

#[async_trait]
pub trait DiscordAppContext: Send + Sync {
    fn store(&self) -> &ConfigStore;

    fn pipeline(&self) -> &ContentPipeline;

    fn voice(&self) -> &VoicePlayer;

    /// Replace the daily trigger. Returns the next fire time.
    fn reschedule(&self, schedule: ScheduleConfig) -> Result<DateTime<Utc>, SchedulerError>;

    /// Most recent scheduled runs, newest first.
    async fn history(&self, limit: usize) -> Result<Vec<RunRecord>, SchedulerError>;

    /// Called on every gateway `ready` with the REST client.
    fn discord_ready(&self, http: Arc<Http>);
}
