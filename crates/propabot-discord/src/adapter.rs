use std::sync::Arc;
use std::time::Duration;

use serenity::gateway::GatewayError;
use serenity::model::gateway::GatewayIntents;
use serenity::model::id::GuildId;
use serenity::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use propabot_core::config::DiscordSettings;

use crate::context::DiscordAppContext;
use crate::error::DiscordError;
use crate::handler::DiscordHandler;

/// Discord channel adapter.
///
/// Wraps a serenity `Client` and drives the event loop, rebuilding the
/// client whenever the gateway drops. Discord refusing the token or the
/// intents ends the loop instead.
pub struct DiscordAdapter<C: DiscordAppContext + 'static> {
    ctx: Arc<C>,
    settings: DiscordSettings,
}

impl<C: DiscordAppContext + 'static> DiscordAdapter<C> {
    pub fn new(settings: &DiscordSettings, ctx: Arc<C>) -> Result<Self, DiscordError> {
        let token = settings.bot_token.trim();
        if token.is_empty() {
            return Err(DiscordError::NoToken);
        }
        serenity::utils::token::validate(token).map_err(|_| DiscordError::InvalidToken)?;
        Ok(Self {
            ctx,
            settings: settings.clone(),
        })
    }

    /// Connect to Discord and keep reconnecting until `cancel` fires.
    ///
    /// Returns an error only when Discord rejects the bot outright; retrying
    /// would fail the same way.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DiscordError> {
        let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

        loop {
            let mut client = tokio::select! {
                _ = cancel.cancelled() => break,
                client = self.connect(intents) => client,
            };

            info!("Discord: gateway connecting");
            let shards = Arc::clone(&client.shard_manager);
            tokio::select! {
                result = client.start() => match result {
                    Err(e) => {
                        if let Some(fatal) = rejection(&e) {
                            error!("Discord: {fatal}, giving up");
                            return Err(fatal);
                        }
                        warn!("Discord: gateway error ({e}), reconnecting in 5s");
                    }
                    Ok(()) => info!("Discord: gateway stopped cleanly, reconnecting in 5s"),
                },
                _ = cancel.cancelled() => {
                    shards.shutdown_all().await;
                    break;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
        }
        info!("Discord: adapter stopped");
        Ok(())
    }

    /// Build a client, retrying every 30s until it succeeds.
    async fn connect(&self, intents: GatewayIntents) -> Client {
        loop {
            match self.build_client(intents).await {
                Ok(c) => return c,
                Err(e) => {
                    error!("Discord: connect failed ({e}), retrying in 30s");
                    tokio::time::sleep(Duration::from_secs(30)).await;
                }
            }
        }
    }

    async fn build_client(&self, intents: GatewayIntents) -> Result<Client, serenity::Error> {
        let handler = DiscordHandler {
            ctx: Arc::clone(&self.ctx),
            command_guild: self.settings.guild_id.map(GuildId::new),
        };

        Client::builder(&self.settings.bot_token, intents)
            .event_handler(handler)
            .await
    }
}

/// Gateway errors that no reconnect can fix.
fn rejection(err: &serenity::Error) -> Option<DiscordError> {
    match err {
        serenity::Error::Gateway(GatewayError::InvalidAuthentication) => {
            Some(DiscordError::InvalidToken)
        }
        serenity::Error::Gateway(
            e @ (GatewayError::InvalidGatewayIntents | GatewayError::DisallowedGatewayIntents),
        ) => Some(DiscordError::Rejected(e.to_string())),
        _ => None,
    }
}
