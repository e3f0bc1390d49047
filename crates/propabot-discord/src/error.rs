/// Errors produced by the Discord adapter.
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("serenity error: {0}")]
    Serenity(#[from] serenity::Error),

    #[error("no bot token configured")]
    NoToken,

    #[error("invalid bot token")]
    InvalidToken,

    #[error("Discord rejected the connection: {0}")]
    Rejected(String),

    #[error("channel {0} is not a guild channel")]
    NotAGuildChannel(u64),

    #[error("Discord client not connected yet")]
    NotConnected,
}
