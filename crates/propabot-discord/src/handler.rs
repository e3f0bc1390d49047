use std::sync::Arc;

use serenity::all::ActivityData;
use serenity::async_trait;
use serenity::model::application::Interaction;
use serenity::model::gateway::Ready;
use serenity::model::id::GuildId;
use serenity::prelude::{Context, EventHandler};
use tracing::info;

use crate::context::DiscordAppContext;

/// Serenity event handler wired to the application context.
pub struct DiscordHandler<C: DiscordAppContext + 'static> {
    pub ctx: Arc<C>,
    /// Register commands on this guild instead of globally.
    pub command_guild: Option<GuildId>,
}

#[async_trait]
impl<C: DiscordAppContext + 'static> EventHandler for DiscordHandler<C> {
    async fn ready(&self, ctx: Context, ready: Ready) {
        ctx.set_activity(Some(ActivityData::watching("the Five-Year Plan")));
        info!(name = %ready.user.name, guilds = ready.guilds.len(), "Discord bot connected");

        self.ctx.discord_ready(Arc::clone(&ctx.http));
        crate::commands::register_commands(&ctx, self.command_guild).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            crate::commands::handle_interaction(&self.ctx, &ctx, &command).await;
        }
    }
}
