//! Voice playback: a per-guild session guard plus a pluggable audio backend.
//!
//! Only one owner may use a guild's voice connection at a time. A second
//! caller gets [`VoiceError::Busy`] instead of queueing. The default backend,
//! [`CommandPlayer`], runs an external player process configured as a command
//! template, e.g. `["voice-relay", "--guild", "{guild_id}", "--channel", "{channel_id}", "{url}"]`.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::http::Http;
use serenity::model::id::ChannelId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DiscordError;

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("voice is busy in this server (in use by {owner})")]
    Busy { owner: String },

    #[error("no audio player configured")]
    NotConfigured,

    #[error("audio player failed: {0}")]
    Player(String),

    #[error("failed to start audio player: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Discord(#[from] DiscordError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRequest {
    pub guild_id: u64,
    pub channel_id: u64,
    pub url: String,
}

/// Plays one audio URL into a voice channel until it ends or `stop` fires.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Whether `play` can do anything at all. Checked before a guild is claimed.
    fn is_configured(&self) -> bool {
        true
    }

    async fn play(&self, request: &PlayRequest, stop: CancellationToken) -> Result<(), VoiceError>;
}

struct Session {
    owner: String,
    lease_id: u64,
    stop: CancellationToken,
}

/// Per-guild ownership of the voice connection.
#[derive(Clone, Default)]
pub struct VoiceSessions {
    inner: Arc<DashMap<u64, Session>>,
    next_id: Arc<AtomicU64>,
}

impl VoiceSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `guild_id` for `owner`. Fails with `Busy` if someone holds it.
    pub fn acquire(&self, guild_id: u64, owner: &str) -> Result<VoiceLease, VoiceError> {
        match self.inner.entry(guild_id) {
            Entry::Occupied(existing) => Err(VoiceError::Busy {
                owner: existing.get().owner.clone(),
            }),
            Entry::Vacant(slot) => {
                let lease_id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let stop = CancellationToken::new();
                slot.insert(Session {
                    owner: owner.to_string(),
                    lease_id,
                    stop: stop.clone(),
                });
                debug!(guild_id, owner, "voice session acquired");
                Ok(VoiceLease {
                    sessions: self.clone(),
                    guild_id,
                    lease_id,
                    stop,
                })
            }
        }
    }

    pub fn owner(&self, guild_id: u64) -> Option<String> {
        self.inner.get(&guild_id).map(|s| s.owner.clone())
    }

    /// Signal the current session in `guild_id` to stop. Returns whether one existed.
    pub fn stop(&self, guild_id: u64) -> bool {
        match self.inner.get(&guild_id) {
            Some(session) => {
                session.stop.cancel();
                true
            }
            None => false,
        }
    }
}

/// Proof of ownership of a guild's voice connection. Released on drop.
pub struct VoiceLease {
    sessions: VoiceSessions,
    guild_id: u64,
    lease_id: u64,
    stop: CancellationToken,
}

impl VoiceLease {
    pub fn guild_id(&self) -> u64 {
        self.guild_id
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

impl Drop for VoiceLease {
    fn drop(&mut self) {
        self.sessions
            .inner
            .remove_if(&self.guild_id, |_, s| s.lease_id == self.lease_id);
        debug!(guild_id = self.guild_id, "voice session released");
    }
}

/// Runs an external player process from a command template.
///
/// `{url}`, `{guild_id}` and `{channel_id}` are substituted in every argument.
/// The process owns the actual voice connection: it must join `{channel_id}`
/// in `{guild_id}` and stream `{url}` there, e.g. a relay that logs in with the
/// bot token. A plain media player only plays on the host.
pub struct CommandPlayer {
    template: Vec<String>,
}

impl CommandPlayer {
    pub fn new(template: Vec<String>) -> Self {
        Self { template }
    }

    fn render(&self, request: &PlayRequest) -> Option<(String, Vec<String>)> {
        let mut parts = self.template.iter().map(|arg| {
            arg.replace("{url}", &request.url)
                .replace("{guild_id}", &request.guild_id.to_string())
                .replace("{channel_id}", &request.channel_id.to_string())
        });
        let program = parts.next()?;
        Some((program, parts.collect()))
    }
}

#[async_trait]
impl AudioBackend for CommandPlayer {
    fn is_configured(&self) -> bool {
        !self.template.is_empty()
    }

    async fn play(&self, request: &PlayRequest, stop: CancellationToken) -> Result<(), VoiceError> {
        let (program, args) = self.render(request).ok_or(VoiceError::NotConfigured)?;

        let mut child = tokio::process::Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        debug!(%program, guild_id = request.guild_id, "audio player started");

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(VoiceError::Player(format!("{program} exited with {status}")))
                }
            }
            _ = stop.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(err = %e, "failed to stop audio player");
                }
                info!(guild_id = request.guild_id, "playback stopped");
                Ok(())
            }
        }
    }
}

/// Entry point for all playback: session guard, backend and guild lookup.
pub struct VoicePlayer {
    sessions: VoiceSessions,
    backend: Arc<dyn AudioBackend>,
    http: OnceLock<Arc<Http>>,
}

impl VoicePlayer {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            sessions: VoiceSessions::new(),
            backend,
            http: OnceLock::new(),
        }
    }

    /// Provide the REST client used to look up a channel's guild.
    pub fn attach_http(&self, http: Arc<Http>) {
        self.http.set(http).ok();
    }

    pub fn sessions(&self) -> &VoiceSessions {
        &self.sessions
    }

    /// Claim the guild and start playing in the background.
    ///
    /// Fails immediately with `NotConfigured` when there is no backend and
    /// with `Busy` when the guild is taken. The lease is released when
    /// playback ends.
    pub fn begin(
        &self,
        guild_id: u64,
        channel_id: u64,
        url: &str,
        owner: &str,
    ) -> Result<JoinHandle<Result<(), VoiceError>>, VoiceError> {
        if !self.backend.is_configured() {
            return Err(VoiceError::NotConfigured);
        }
        let lease = self.sessions.acquire(guild_id, owner)?;
        let backend = Arc::clone(&self.backend);
        let request = PlayRequest {
            guild_id,
            channel_id,
            url: url.to_string(),
        };
        info!(guild_id, channel_id, owner, "starting playback");
        Ok(tokio::spawn(async move {
            let result = backend.play(&request, lease.stop_token()).await;
            drop(lease);
            if let Err(e) = &result {
                warn!(guild_id = request.guild_id, err = %e, "playback failed");
            }
            result
        }))
    }

    /// Play in a known guild and wait for playback to finish.
    pub async fn play_in(
        &self,
        guild_id: u64,
        channel_id: u64,
        url: &str,
        owner: &str,
    ) -> Result<(), VoiceError> {
        let handle = self.begin(guild_id, channel_id, url, owner)?;
        handle
            .await
            .map_err(|e| VoiceError::Player(format!("playback task failed: {e}")))?
    }

    /// Resolve the guild of `channel_id`, then play and wait.
    pub async fn play(&self, channel_id: u64, url: &str, owner: &str) -> Result<(), VoiceError> {
        let guild_id = self.guild_of(channel_id).await?;
        self.play_in(guild_id, channel_id, url, owner).await
    }

    pub async fn guild_of(&self, channel_id: u64) -> Result<u64, DiscordError> {
        let http = self.http.get().ok_or(DiscordError::NotConnected)?;
        let channel = ChannelId::new(channel_id).to_channel(http).await?;
        channel
            .guild()
            .map(|c| c.guild_id.get())
            .ok_or(DiscordError::NotAGuildChannel(channel_id))
    }

    /// Stop whatever is playing in `guild_id`.
    pub fn stop(&self, guild_id: u64) -> bool {
        self.sessions.stop(guild_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[test]
    fn second_owner_is_rejected() {
        let sessions = VoiceSessions::new();
        let lease = sessions.acquire(1, "scheduler").unwrap();
        match sessions.acquire(1, "alert") {
            Err(VoiceError::Busy { owner }) => assert_eq!(owner, "scheduler"),
            _ => panic!("expected Busy"),
        }
        // Other guilds are independent.
        let _other = sessions.acquire(2, "alert").unwrap();

        drop(lease);
        assert!(sessions.owner(1).is_none());
        assert!(sessions.acquire(1, "alert").is_ok());
    }

    #[test]
    fn template_substitution() {
        let player = CommandPlayer::new(vec![
            "relay".into(),
            "--guild={guild_id}".into(),
            "{channel_id}".into(),
            "{url}".into(),
        ]);
        let (program, args) = player
            .render(&PlayRequest {
                guild_id: 10,
                channel_id: 20,
                url: "https://example.com/a.mp3".into(),
            })
            .unwrap();
        assert_eq!(program, "relay");
        assert_eq!(args, ["--guild=10", "20", "https://example.com/a.mp3"]);
        assert!(CommandPlayer::new(vec![]).render(&PlayRequest {
            guild_id: 1,
            channel_id: 1,
            url: String::new(),
        })
        .is_none());
    }

    #[tokio::test]
    async fn command_player_reports_exit_status() {
        let req = PlayRequest {
            guild_id: 1,
            channel_id: 2,
            url: "ok".into(),
        };
        let ok = CommandPlayer::new(vec!["sh".into(), "-c".into(), "test {url} = ok".into()]);
        assert!(ok.play(&req, CancellationToken::new()).await.is_ok());

        let bad = CommandPlayer::new(vec!["sh".into(), "-c".into(), "exit 3".into()]);
        assert!(matches!(
            bad.play(&req, CancellationToken::new()).await,
            Err(VoiceError::Player(_))
        ));
    }

    #[tokio::test]
    async fn stop_kills_running_player() {
        let player = VoicePlayer::new(Arc::new(CommandPlayer::new(vec![
            "sleep".into(),
            "30".into(),
        ])));
        let handle = player.begin(7, 8, "u", "user:1").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(player.stop(7));
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert!(player.sessions().owner(7).is_none());
        assert!(!player.stop(7));
    }

    struct Recording(Mutex<Vec<PlayRequest>>);

    #[async_trait]
    impl AudioBackend for Recording {
        async fn play(&self, request: &PlayRequest, _stop: CancellationToken) -> Result<(), VoiceError> {
            self.0.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn play_in_releases_lease_after_playback() {
        let backend = Arc::new(Recording(Mutex::new(Vec::new())));
        let player = VoicePlayer::new(backend.clone());

        player.play_in(3, 4, "https://x/y.ogg", "alert").await.unwrap();
        player.play_in(3, 4, "https://x/z.ogg", "scheduler").await.unwrap();

        let calls = backend.0.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].url, "https://x/z.ogg");
    }

    #[tokio::test]
    async fn begin_without_player_fails_before_claiming_guild() {
        let player = VoicePlayer::new(Arc::new(CommandPlayer::new(vec![])));
        assert!(matches!(
            player.begin(1, 2, "https://x/y.ogg", "user:1"),
            Err(VoiceError::NotConfigured)
        ));
        assert!(player.sessions().owner(1).is_none());
        assert!(matches!(
            player.play_in(1, 2, "https://x/y.ogg", "alert").await,
            Err(VoiceError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn play_without_connection_fails() {
        let player = VoicePlayer::new(Arc::new(Recording(Mutex::new(Vec::new()))));
        assert!(matches!(
            player.play(4, "u", "alert").await,
            Err(VoiceError::Discord(DiscordError::NotConnected))
        ));
    }
}
