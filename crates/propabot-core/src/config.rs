use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_IMAGE_SUBMIT_URL: &str =
    "https://api.wavespeed.ai/api/v2/wavespeed-ai/hidream-i1-full";
pub const DEFAULT_PRESENCE_BASE_URL: &str = "https://api.steampowered.com";

/// Static process settings (propabot.toml + PROPABOT_* env overrides).
///
/// Everything a user can change from Discord lives in the JSON
/// [`crate::store::PropagandaConfig`] instead.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub discord: Option<DiscordSettings>,
    #[serde(default)]
    pub image: ImageSettings,
    #[serde(default)]
    pub text: Option<TextProviderSettings>,
    #[serde(default)]
    pub presence: PresenceSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub bot: BotSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Start the bot as soon as the HTTP server is up, without waiting for `POST /start`.
    #[serde(default = "bool_true")]
    pub autostart: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            autostart: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordSettings {
    pub bot_token: String,
    /// Register slash commands on this guild only (instant update) instead of globally.
    #[serde(default)]
    pub guild_id: Option<u64>,
}

/// Asynchronous image-generation job API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSettings {
    #[serde(default = "default_image_submit_url")]
    pub submit_url: String,
    #[serde(default = "default_image_size")]
    pub size: String,
    #[serde(default = "default_poll_attempts")]
    pub max_poll_attempts: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "bool_true")]
    pub safety_checker: bool,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            submit_url: default_image_submit_url(),
            size: default_image_size(),
            max_poll_attempts: default_poll_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
            safety_checker: true,
        }
    }
}

/// OpenAI-compatible chat endpoint used to write slogans.
/// When absent the configured prompt is used verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextProviderSettings {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSettings {
    /// Presence API key. Monitoring is disabled while unset.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_presence_base_url")]
    pub base_url: String,
    #[serde(default = "default_presence_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_presence_backoff_secs")]
    pub backoff_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_presence_base_url(),
            interval_secs: default_presence_interval_secs(),
            backoff_secs: default_presence_backoff_secs(),
        }
    }
}

/// External voice relay. Each argument may contain `{url}`, `{guild_id}`
/// and `{channel_id}` placeholders; the command joins that voice channel and
/// streams the URL into it. An empty command disables audio.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AudioSettings {
    #[serde(default)]
    pub player_command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// How long after the daily slot a (re)configuration still triggers a catch-up run.
    #[serde(default = "default_catch_up_secs")]
    pub catch_up_window_secs: u64,
    /// How late a trigger may wake up and still fire.
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            catch_up_window_secs: default_catch_up_secs(),
            misfire_grace_secs: default_misfire_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// JSON file holding the user-editable [`crate::store::PropagandaConfig`].
    #[serde(default = "default_config_path")]
    pub config_path: String,
    /// Where downloaded posters are staged before upload. Defaults to the OS temp dir.
    #[serde(default)]
    pub temp_dir: Option<String>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            temp_dir: None,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_image_submit_url() -> String {
    DEFAULT_IMAGE_SUBMIT_URL.to_string()
}
fn default_image_size() -> String {
    "768*1152".to_string()
}
fn default_poll_attempts() -> u32 {
    30
}
fn default_poll_interval_secs() -> u64 {
    2
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_text_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_presence_base_url() -> String {
    DEFAULT_PRESENCE_BASE_URL.to_string()
}
fn default_presence_interval_secs() -> u64 {
    30
}
fn default_presence_backoff_secs() -> u64 {
    5
}
fn default_catch_up_secs() -> u64 {
    300
}
fn default_misfire_grace_secs() -> u64 {
    600
}
fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}
fn default_db_path() -> String {
    format!("{}/.propabot/propabot.db", home_dir())
}
fn default_config_path() -> String {
    format!("{}/.propabot/propaganda_config.json", home_dir())
}
fn default_settings_path() -> String {
    format!("{}/.propabot/propabot.toml", home_dir())
}

impl Settings {
    /// Load settings from a TOML file with `PROPABOT_*` env var overrides.
    ///
    /// Nested keys use a double underscore: `PROPABOT_DISCORD__BOT_TOKEN`,
    /// `PROPABOT_GATEWAY__PORT`. A missing file is not an error; every
    /// section falls back to its defaults.
    pub fn load(settings_path: Option<&str>) -> crate::error::Result<Self> {
        let path = settings_path
            .map(String::from)
            .unwrap_or_else(default_settings_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PROPABOT_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load(Some("/nonexistent/propabot.toml")).unwrap();
        assert_eq!(settings.gateway.bind, DEFAULT_BIND);
        assert!(settings.gateway.autostart);
        assert_eq!(settings.image.max_poll_attempts, 30);
        assert_eq!(settings.scheduler.catch_up_window_secs, 300);
        assert_eq!(settings.scheduler.misfire_grace_secs, 600);
    }

    #[test]
    fn toml_sections_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[gateway]
port = 8080
autostart = false

[discord]
bot_token = "abc"
guild_id = 42

[audio]
player_command = ["voice-relay", "--channel", "{{channel_id}}", "{{url}}"]
"#
        )
        .unwrap();

        let settings = Settings::load(file.path().to_str()).unwrap();
        assert_eq!(settings.gateway.port, 8080);
        assert!(!settings.gateway.autostart);
        let discord = settings.discord.unwrap();
        assert_eq!(discord.bot_token, "abc");
        assert_eq!(discord.guild_id, Some(42));
        assert_eq!(settings.audio.player_command[2], "{channel_id}");
        assert_eq!(settings.audio.player_command[3], "{url}");
        // untouched section keeps its defaults
        assert_eq!(settings.presence.interval_secs, 30);
    }
}
