//! `DeliveryTarget` implementations backed by Discord.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{
    CreateAttachment, CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, CreateMessage,
};
use serenity::http::Http;
use serenity::model::application::CommandInteraction;
use serenity::model::id::ChannelId;

use propabot_core::{DeliveryError, DeliveryTarget};

use crate::send::{send_chunked, split_chunks};

fn platform(e: serenity::Error) -> DeliveryError {
    DeliveryError::Platform(e.to_string())
}

async fn read_attachment(path: &Path, filename: &str) -> Result<CreateAttachment, DeliveryError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(CreateAttachment::bytes(bytes, filename.to_string()))
}

/// A plain text channel. Used by scheduled runs, which have no interaction
/// to answer.
pub struct ChannelTarget {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelTarget {
    pub fn new(http: Arc<Http>, channel_id: u64) -> Self {
        Self {
            http,
            channel_id: ChannelId::new(channel_id),
        }
    }
}

#[async_trait]
impl DeliveryTarget for ChannelTarget {
    fn describe(&self) -> String {
        format!("channel:{}", self.channel_id)
    }

    async fn send(&self, content: &str) -> Result<(), DeliveryError> {
        send_chunked(&self.http, self.channel_id, content)
            .await
            .map_err(platform)
    }

    async fn send_file(
        &self,
        path: &Path,
        filename: &str,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        let file = read_attachment(path, filename).await?;
        self.channel_id
            .send_message(&self.http, CreateMessage::new().content(caption).add_file(file))
            .await
            .map_err(platform)?;
        Ok(())
    }
}

/// Replies to a slash command. After `defer_ack` everything goes out as
/// follow-ups; before it, the first message becomes the interaction response.
pub struct InteractionTarget {
    http: Arc<Http>,
    command: CommandInteraction,
    responded: AtomicBool,
}

impl InteractionTarget {
    pub fn new(http: Arc<Http>, command: CommandInteraction) -> Self {
        Self {
            http,
            command,
            responded: AtomicBool::new(false),
        }
    }

    async fn respond_or_follow_up(&self, content: &str) -> Result<(), serenity::Error> {
        if !self.responded.swap(true, Ordering::SeqCst) {
            return self
                .command
                .create_response(
                    &self.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new().content(content),
                    ),
                )
                .await;
        }
        self.command
            .create_followup(
                &self.http,
                CreateInteractionResponseFollowup::new().content(content),
            )
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl DeliveryTarget for InteractionTarget {
    fn describe(&self) -> String {
        format!("interaction:/{}@{}", self.command.data.name, self.command.channel_id)
    }

    async fn defer_ack(&self) -> Result<(), DeliveryError> {
        if self.responded.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.command.defer(&self.http).await.map_err(platform)
    }

    async fn send(&self, content: &str) -> Result<(), DeliveryError> {
        for chunk in split_chunks(content) {
            self.respond_or_follow_up(&chunk).await.map_err(platform)?;
        }
        Ok(())
    }

    async fn send_file(
        &self,
        path: &Path,
        filename: &str,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        let file = read_attachment(path, filename).await?;
        if !self.responded.swap(true, Ordering::SeqCst) {
            return self
                .command
                .create_response(
                    &self.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content(caption)
                            .add_file(file),
                    ),
                )
                .await
                .map_err(platform);
        }
        self.command
            .create_followup(
                &self.http,
                CreateInteractionResponseFollowup::new()
                    .content(caption)
                    .add_file(file),
            )
            .await
            .map_err(platform)?;
        Ok(())
    }
}
