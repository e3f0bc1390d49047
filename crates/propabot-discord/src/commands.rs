//! Slash commands.
//!
//! Registration happens in `ready()`. Interactions are dispatched from
//! `interaction_create` in the event handler. Each command is one config
//! mutation, one pipeline run, or one voice action.

use std::sync::Arc;

use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateEmbed, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};
use serenity::model::application::{CommandInteraction, CommandOptionType};
use serenity::model::channel::ChannelType;
use serenity::model::id::{ChannelId, GuildId};
use serenity::model::Colour;
use serenity::model::Permissions;
use serenity::prelude::Context;
use tracing::{info, warn};

use propabot_core::store::parse_timezone;
use propabot_core::{DeliveryTarget, PropagandaConfig, ScheduleConfig};
use propabot_generation::{report_failure, PosterRequest};
use propabot_scheduler::RunRecord;

use crate::context::DiscordAppContext;
use crate::delivery::InteractionTarget;
use crate::voice::VoiceError;

/// Embed fields are capped at 1024 characters by Discord.
const PROMPT_PREVIEW_MAX: usize = 900;
const HISTORY_LIMIT: usize = 10;

const GENERATING_NOTICE: &str =
    "A True Piece is in the Making... Smoke a true cigarette in the meanwhile \u{1f6ac}.";

fn admin(command: CreateCommand) -> CreateCommand {
    command.default_member_permissions(Permissions::MANAGE_GUILD)
}

fn string_option(name: &str, description: &str, required: bool) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, name, description).required(required)
}

fn command_definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("generate").description("Generate a propaganda poster immediately"),
        admin(
            CreateCommand::new("set_channel")
                .description("Set the channel for daily propaganda posters")
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::Channel,
                        "channel",
                        "Text channel (defaults to this one)",
                    )
                    .channel_types(vec![ChannelType::Text])
                    .required(false),
                ),
        ),
        admin(
            CreateCommand::new("set_voice_channel")
                .description("Set the voice channel for music and alerts")
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::Channel,
                        "channel",
                        "Voice channel (defaults to the one you are in)",
                    )
                    .channel_types(vec![ChannelType::Voice])
                    .required(false),
                ),
        ),
        admin(
            CreateCommand::new("set_time")
                .description("Set the time for daily posts (HH:MM)")
                .add_option(string_option("time", "24-hour time, e.g. 15:30", true)),
        ),
        admin(
            CreateCommand::new("set_timezone")
                .description("Set the timezone for daily posts")
                .add_option(string_option("timezone", "IANA name, e.g. Europe/London", true)),
        ),
        admin(
            CreateCommand::new("set_prompt")
                .description("Set the prompt used to write the slogan")
                .add_option(string_option("prompt", "Slogan prompt", true)),
        ),
        admin(
            CreateCommand::new("set_caption")
                .description("Set the caption posted with each poster")
                .add_option(string_option("caption", "Poster caption", true)),
        ),
        admin(
            CreateCommand::new("set_playlist")
                .description("Set the audio played after the daily poster")
                .add_option(string_option("url", "Audio URL (omit to clear)", false)),
        ),
        CreateCommand::new("show_config").description("Show current configuration"),
        CreateCommand::new("history").description("Show recent scheduled runs"),
        CreateCommand::new("play")
            .description("Play an audio URL in your voice channel")
            .add_option(string_option("url", "Audio URL", true)),
        CreateCommand::new("leave").description("Stop playback and leave the voice channel"),
    ]
}

/// Register slash commands. Call from `ready()`.
///
/// With a guild id the commands update instantly on that guild only;
/// global registration can take up to an hour to propagate.
pub async fn register_commands(ctx: &Context, guild_id: Option<GuildId>) {
    let commands = command_definitions();

    match guild_id {
        Some(gid) => match gid.set_commands(&ctx.http, commands).await {
            Ok(cmds) => info!(guild = %gid, count = cmds.len(), "registered guild slash commands"),
            Err(e) => warn!(guild = %gid, error = %e, "failed to register guild commands"),
        },
        None => {
            match serenity::model::application::Command::set_global_commands(&ctx.http, commands)
                .await
            {
                Ok(cmds) => info!(count = cmds.len(), "registered global slash commands"),
                Err(e) => warn!(error = %e, "failed to register global slash commands"),
            }
        }
    }
}

/// Dispatch a slash command interaction to the appropriate handler.
pub async fn handle_interaction<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) {
    let result = match command.data.name.as_str() {
        "generate" => handle_generate(app, ctx, command).await,
        "set_channel" => handle_set_channel(app, ctx, command).await,
        "set_voice_channel" => handle_set_voice_channel(app, ctx, command).await,
        "set_time" => handle_set_time(app, ctx, command).await,
        "set_timezone" => handle_set_timezone(app, ctx, command).await,
        "set_prompt" => handle_set_prompt(app, ctx, command).await,
        "set_caption" => handle_set_caption(app, ctx, command).await,
        "set_playlist" => handle_set_playlist(app, ctx, command).await,
        "show_config" => handle_show_config(app, ctx, command).await,
        "history" => handle_history(app, ctx, command).await,
        "play" => handle_play(app, ctx, command).await,
        "leave" => handle_leave(app, ctx, command).await,
        _ => {
            respond_ephemeral(ctx, command, "Unknown command.").await;
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(command = %command.data.name, error = %e, "slash command error");
    }
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn option_channel(command: &CommandInteraction, name: &str) -> Option<ChannelId> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_channel_id())
}

/// The voice channel the invoking user is currently in, from the cache.
fn user_voice_channel(ctx: &Context, command: &CommandInteraction) -> Option<ChannelId> {
    let guild_id = command.guild_id?;
    let guild = ctx.cache.guild(guild_id)?;
    let channel = guild
        .voice_states
        .get(&command.user.id)
        .and_then(|state| state.channel_id);
    channel
}

fn owner_of(command: &CommandInteraction) -> String {
    format!("user:{}", command.user.id)
}

/// Persist a config change and answer with `ok` or the validation error.
async fn update_and_reply<F>(
    app: &impl DiscordAppContext,
    ctx: &Context,
    command: &CommandInteraction,
    mutate: F,
    ok: &str,
) -> Result<(), serenity::Error>
where
    F: FnOnce(&mut PropagandaConfig),
{
    match app.store().update(mutate) {
        Ok(_) => {
            info!(command = %command.data.name, user = %command.user.id, "configuration changed");
            respond(ctx, command, ok).await
        }
        Err(e) => {
            warn!(
                command = %command.data.name,
                code = e.code(),
                error = %e,
                "configuration change rejected"
            );
            respond_ephemeral(ctx, command, &format!("Could not save configuration: {e}")).await;
            Ok(())
        }
    }
}

/// `/generate`: run the pipeline now and post into this channel.
async fn handle_generate<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let target = InteractionTarget::new(Arc::clone(&ctx.http), command.clone());
    let request = PosterRequest::from_config(&app.store().snapshot());

    if let Err(e) = target.send(GENERATING_NOTICE).await {
        warn!(error = %e, "failed to acknowledge /generate");
    }

    match app.pipeline().generate_and_deliver(&request, &target).await {
        Ok(outcome) => info!(
            user = %command.user.id,
            attempts = outcome.attempts,
            "on-demand poster delivered"
        ),
        Err(e) => {
            warn!(user = %command.user.id, error = %e, "on-demand poster failed");
            report_failure(&target, &e).await;
        }
    }
    Ok(())
}

/// `/set_channel [channel]`
async fn handle_set_channel<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let channel = option_channel(command, "channel").unwrap_or(command.channel_id);
    let reply = format!("Channel set for propaganda posters: <#{channel}>");
    update_and_reply(
        &**app,
        ctx,
        command,
        |cfg| cfg.channel_id = Some(channel.get()),
        &reply,
    )
    .await
}

/// `/set_voice_channel [channel]`
async fn handle_set_voice_channel<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let Some(channel) =
        option_channel(command, "channel").or_else(|| user_voice_channel(ctx, command))
    else {
        respond_ephemeral(ctx, command, "You must be in a voice channel to set it!").await;
        return Ok(());
    };
    let reply = format!("Voice channel set to: <#{channel}>");
    update_and_reply(
        &**app,
        ctx,
        command,
        |cfg| cfg.voice_channel_id = Some(channel.get()),
        &reply,
    )
    .await
}

/// Save a schedule change, then move the daily trigger.
async fn apply_schedule<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
    mutate: impl FnOnce(&mut ScheduleConfig),
) -> Result<(), serenity::Error> {
    let config = match app.store().update(|cfg| mutate(&mut cfg.schedule)) {
        Ok(c) => c,
        Err(e) => {
            respond_ephemeral(ctx, command, &format!("Could not save configuration: {e}")).await;
            return Ok(());
        }
    };

    let reply = match app.reschedule(config.schedule.clone()) {
        Ok(next) => {
            info!(schedule = %config.schedule, next = %next, "daily poster rescheduled");
            format!(
                "Post time set to {}. Next poster <t:{}:F>.",
                config.schedule,
                next.timestamp()
            )
        }
        Err(e) => {
            warn!(error = %e, "schedule saved but trigger not updated");
            format!(
                "Post time saved as {}, but the scheduler is not running yet: {e}",
                config.schedule
            )
        }
    };
    respond(ctx, command, &reply).await
}

/// `/set_time HH:MM`
async fn handle_set_time<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let parsed = option_str(command, "time").map(ScheduleConfig::parse_time);
    let Some(Ok((hour, minute))) = parsed else {
        respond_ephemeral(ctx, command, "Invalid time format. Use HH:MM (e.g., 15:30)").await;
        return Ok(());
    };
    apply_schedule(app, ctx, command, |s| {
        s.hour = hour;
        s.minute = minute;
    })
    .await
}

/// `/set_timezone tz`
async fn handle_set_timezone<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let Some(tz) = option_str(command, "timezone").filter(|tz| parse_timezone(tz).is_ok()) else {
        respond_ephemeral(
            ctx,
            command,
            "Invalid timezone. Example: US/Eastern, Europe/London",
        )
        .await;
        return Ok(());
    };
    let tz = tz.to_string();
    apply_schedule(app, ctx, command, |s| s.timezone = tz).await
}

/// `/set_prompt prompt`
async fn handle_set_prompt<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let Some(prompt) = option_str(command, "prompt").map(str::to_string) else {
        respond_ephemeral(ctx, command, "Please provide a prompt.").await;
        return Ok(());
    };
    update_and_reply(
        &**app,
        ctx,
        command,
        |cfg| cfg.text_prompt = prompt,
        "Slogan prompt updated.",
    )
    .await
}

/// `/set_caption caption`
async fn handle_set_caption<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let Some(caption) = option_str(command, "caption").map(str::to_string) else {
        respond_ephemeral(ctx, command, "Please provide a caption.").await;
        return Ok(());
    };
    let reply = format!("Caption set to: **{caption}**");
    update_and_reply(
        &**app,
        ctx,
        command,
        |cfg| cfg.poster_caption = caption,
        &reply,
    )
    .await
}

/// `/set_playlist [url]`: omitting the URL clears it.
async fn handle_set_playlist<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let url = option_str(command, "url").map(str::to_string);
    let reply = match &url {
        Some(u) => format!("Playlist set to: {u}"),
        None => "Playlist cleared.".to_string(),
    };
    update_and_reply(
        &**app,
        ctx,
        command,
        |cfg| cfg.playlist_url = url,
        &reply,
    )
    .await
}

/// `/show_config`
async fn handle_show_config<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let embed = CreateEmbed::new()
        .title("Propaganda Poster Configuration")
        .colour(Colour::ORANGE)
        .fields(config_fields(&app.store().snapshot()));

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await
}

/// `/history`
async fn handle_history<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let text = match app.history(HISTORY_LIMIT).await {
        Ok(records) => format_history(&records),
        Err(e) => {
            warn!(error = %e, "failed to read run history");
            format!("Could not read run history: {e}")
        }
    };
    respond_ephemeral(ctx, command, &text).await;
    Ok(())
}

/// `/play url`
async fn handle_play<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let Some(guild_id) = command.guild_id else {
        respond_ephemeral(ctx, command, "Playback only works in a server.").await;
        return Ok(());
    };
    let Some(url) = option_str(command, "url") else {
        respond_ephemeral(ctx, command, "Please provide a URL.").await;
        return Ok(());
    };
    let Some(channel) = user_voice_channel(ctx, command) else {
        respond_ephemeral(ctx, command, "You must be in a voice channel to use this command!")
            .await;
        return Ok(());
    };

    match app
        .voice()
        .begin(guild_id.get(), channel.get(), url, &owner_of(command))
    {
        // Playback continues on its own task; the lease is released when it ends.
        Ok(_playback) => respond(ctx, command, &format!("Now playing in <#{channel}>: {url}")).await,
        Err(VoiceError::Busy { owner }) => {
            respond_ephemeral(ctx, command, &format!("Voice is busy right now ({owner}).")).await;
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "playback failed to start");
            respond_ephemeral(ctx, command, &format!("Error playing music: {e}")).await;
            Ok(())
        }
    }
}

/// `/leave`
async fn handle_leave<C: DiscordAppContext + 'static>(
    app: &Arc<C>,
    ctx: &Context,
    command: &CommandInteraction,
) -> Result<(), serenity::Error> {
    let stopped = command
        .guild_id
        .is_some_and(|gid| app.voice().stop(gid.get()));
    if stopped {
        respond(ctx, command, "Left the voice channel!").await
    } else {
        respond_ephemeral(ctx, command, "I'm not in a voice channel!").await;
        Ok(())
    }
}

fn truncate_prompt(prompt: &str) -> String {
    if prompt.chars().count() <= PROMPT_PREVIEW_MAX {
        return prompt.to_string();
    }
    let kept: String = prompt.chars().take(PROMPT_PREVIEW_MAX - 3).collect();
    format!("{kept}...")
}

fn config_fields(config: &PropagandaConfig) -> Vec<(&'static str, String, bool)> {
    let channel = |id: Option<u64>| id.map_or_else(|| "Not set".to_string(), |id| format!("<#{id}>"));
    vec![
        ("Channel", channel(config.channel_id), true),
        ("Post Time", config.schedule.to_string(), true),
        ("Voice Channel", channel(config.voice_channel_id), true),
        ("Caption", config.poster_caption.clone(), false),
        ("Text Prompt", truncate_prompt(&config.text_prompt), false),
        (
            "Style",
            format!("{} / {}", config.image_style, config.image_theme),
            false,
        ),
        (
            "Playlist",
            config.playlist_url.clone().unwrap_or_else(|| "Not set".into()),
            false,
        ),
        (
            "Image Credentials",
            format!("{} configured, {} rounds", config.credentials.len(), config.max_retries),
            true,
        ),
        ("Watched Accounts", config.watched_ids.len().to_string(), true),
    ]
}

fn format_history(records: &[RunRecord]) -> String {
    if records.is_empty() {
        return "No scheduled runs yet.".to_string();
    }
    let mut text = format!("**Recent runs** ({}):\n", records.len());
    for r in records {
        text.push_str(&format!(
            "- <t:{}:f> {} **{}**",
            r.slot.timestamp(),
            r.kind,
            r.outcome
        ));
        if let Some(detail) = &r.detail {
            let short: String = detail.chars().take(120).collect();
            text.push_str(&format!(" `{short}`"));
        }
        text.push('\n');
    }
    text
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    content: &str,
) -> Result<(), serenity::Error> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await
}

/// Send an ephemeral response to a slash command (only visible to the invoker).
async fn respond_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) {
    let _ = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use propabot_scheduler::{FireKind, RunOutcome};

    use super::*;

    #[test]
    fn twelve_commands_are_registered() {
        assert_eq!(command_definitions().len(), 12);
    }

    #[test]
    fn long_prompt_is_truncated_for_the_embed() {
        let prompt = "p".repeat(1200);
        let shown = truncate_prompt(&prompt);
        assert_eq!(shown.chars().count(), PROMPT_PREVIEW_MAX);
        assert!(shown.ends_with("..."));
        assert_eq!(truncate_prompt("short"), "short");
    }

    #[test]
    fn config_fields_hide_credentials() {
        let config = PropagandaConfig {
            channel_id: Some(42),
            credentials: vec!["secret-a".into(), "secret-b".into()],
            ..PropagandaConfig::default()
        };
        let fields = config_fields(&config);
        assert_eq!(fields[0].1, "<#42>");
        assert_eq!(fields[2].1, "Not set");
        assert!(fields.iter().all(|(_, v, _)| !v.contains("secret")));
        let creds = fields.iter().find(|(n, _, _)| *n == "Image Credentials").unwrap();
        assert!(creds.1.starts_with("2 configured"));
    }

    #[test]
    fn history_lists_outcomes() {
        let slot = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let records = vec![RunRecord {
            id: "r1".into(),
            job: "daily-content".into(),
            slot,
            kind: FireKind::CatchUp,
            started_at: slot,
            finished_at: Some(slot),
            outcome: RunOutcome::Failed,
            detail: Some("all credentials exhausted".into()),
        }];
        let text = format_history(&records);
        assert!(text.contains(&format!("<t:{}:f>", slot.timestamp())));
        assert!(text.contains("**failed**"));
        assert!(text.contains("`all credentials exhausted`"));
        assert_eq!(format_history(&[]), "No scheduled runs yet.");
    }
}
