pub mod adapter;
pub mod commands;
pub mod context;
pub mod delivery;
pub mod error;
pub mod handler;
pub mod send;
pub mod voice;

pub use adapter::DiscordAdapter;
pub use context::DiscordAppContext;
pub use delivery::{ChannelTarget, InteractionTarget};
pub use error::DiscordError;
pub use voice::{AudioBackend, CommandPlayer, PlayRequest, VoiceError, VoicePlayer, VoiceSessions};
