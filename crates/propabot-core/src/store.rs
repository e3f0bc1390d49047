//! Persisted, user-editable bot configuration.
//!
//! Stored as a flat JSON file and mutated by slash commands. Every
//! successful [`ConfigStore::update`] is validated and written to disk before
//! it becomes visible to readers.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, Result};

pub const DEFAULT_TEXT_PROMPT: &str =
    "Generate a short, inspiring slogan for a propaganda poster about technology and progress";
pub const DEFAULT_POSTER_CAPTION: &str = "A True Malborian Culture Piece:";
pub const DEFAULT_IMAGE_STYLE: &str = "soviet propaganda poster style";
pub const DEFAULT_IMAGE_THEME: &str = "motivational";
pub const DEFAULT_TIMEZONE: &str = "Asia/Jerusalem";
/// Steam app id for Counter-Strike 2.
pub const DEFAULT_WATCHED_APP_ID: &str = "730";
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Daily trigger time, interpreted in `timezone`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    pub hour: u8,
    pub minute: u8,
    /// IANA timezone name, e.g. `Europe/London`.
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hour: 12,
            minute: 0,
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn new(hour: u8, minute: u8, timezone: impl Into<String>) -> Result<Self> {
        let schedule = Self {
            hour,
            minute,
            timezone: timezone.into(),
        };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 {
            return Err(CoreError::InvalidSchedule(format!(
                "hour {} out of range 0-23",
                self.hour
            )));
        }
        if self.minute > 59 {
            return Err(CoreError::InvalidSchedule(format!(
                "minute {} out of range 0-59",
                self.minute
            )));
        }
        self.tz()?;
        Ok(())
    }

    /// Parsed timezone.
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    /// Parse `HH:MM` (24-hour clock) into an hour/minute pair.
    pub fn parse_time(s: &str) -> Result<(u8, u8)> {
        let bad = || CoreError::InvalidSchedule(format!("expected HH:MM, got `{s}`"));
        let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
        let hour: u8 = h.parse().map_err(|_| bad())?;
        let minute: u8 = m.parse().map_err(|_| bad())?;
        if hour > 23 || minute > 59 {
            return Err(bad());
        }
        Ok((hour, minute))
    }
}

impl std::fmt::Display for ScheduleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02} {}", self.hour, self.minute, self.timezone)
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CoreError::UnknownTimezone(name.to_string()))
}

/// Everything the bot reads at run time and users can change from Discord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PropagandaConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Text channel receiving the daily poster.
    #[serde(default)]
    pub channel_id: Option<u64>,
    /// Voice channel used for post-poster audio and presence alerts.
    #[serde(default)]
    pub voice_channel_id: Option<u64>,
    /// Audio played after the daily poster.
    #[serde(default)]
    pub playlist_url: Option<String>,
    #[serde(default = "default_text_prompt")]
    pub text_prompt: String,
    #[serde(default = "default_poster_caption")]
    pub poster_caption: String,
    #[serde(default = "default_image_style")]
    pub image_style: String,
    #[serde(default = "default_image_theme")]
    pub image_theme: String,
    /// Rounds over the credential list before giving up (1-10).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Image-provider credentials, tried in order.
    #[serde(default)]
    pub credentials: Vec<String>,
    /// Presence accounts to watch.
    #[serde(default)]
    pub watched_ids: Vec<String>,
    #[serde(default = "default_watched_app_id")]
    pub watched_app_id: String,
    /// Clip played when a watched account starts the watched game.
    #[serde(default)]
    pub alert_media_url: Option<String>,
}

impl Default for PropagandaConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            channel_id: None,
            voice_channel_id: None,
            playlist_url: None,
            text_prompt: default_text_prompt(),
            poster_caption: default_poster_caption(),
            image_style: default_image_style(),
            image_theme: default_image_theme(),
            max_retries: default_max_retries(),
            credentials: Vec::new(),
            watched_ids: Vec::new(),
            watched_app_id: default_watched_app_id(),
            alert_media_url: None,
        }
    }
}

impl PropagandaConfig {
    pub fn validate(&self) -> Result<()> {
        self.schedule.validate()?;
        if !(1..=MAX_RETRIES_LIMIT).contains(&self.max_retries) {
            return Err(CoreError::Config(format!(
                "max_retries must be between 1 and {MAX_RETRIES_LIMIT}, got {}",
                self.max_retries
            )));
        }
        if self.text_prompt.trim().is_empty() {
            return Err(CoreError::Config("text_prompt must not be empty".into()));
        }
        Ok(())
    }
}

fn default_text_prompt() -> String {
    DEFAULT_TEXT_PROMPT.to_string()
}
fn default_poster_caption() -> String {
    DEFAULT_POSTER_CAPTION.to_string()
}
fn default_image_style() -> String {
    DEFAULT_IMAGE_STYLE.to_string()
}
fn default_image_theme() -> String {
    DEFAULT_IMAGE_THEME.to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_watched_app_id() -> String {
    DEFAULT_WATCHED_APP_ID.to_string()
}

/// Durable key-value store over a single JSON file.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<PropagandaConfig>,
}

impl ConfigStore {
    /// Load `path`, or start from defaults when the file does not exist yet.
    ///
    /// A file that exists but fails to parse or validate is an error: the
    /// bot refuses to run on a config it would silently overwrite.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let config: PropagandaConfig = serde_json::from_str(&raw)?;
            config.validate()?;
            info!(path = %path.display(), "loaded bot configuration");
            config
        } else {
            warn!(path = %path.display(), "no bot configuration file, using defaults");
            PropagandaConfig::default()
        };
        Ok(Self {
            path,
            current: RwLock::new(config),
        })
    }

    /// In-memory store seeded with `config`; nothing is written until the first save.
    pub fn with_config(path: impl Into<PathBuf>, config: PropagandaConfig) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clone of the current configuration.
    pub fn snapshot(&self) -> PropagandaConfig {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Persist the current configuration.
    pub fn save(&self) -> Result<()> {
        let config = self.snapshot();
        write_atomically(&self.path, &config)
    }

    /// Apply `mutate` to a copy, validate it, persist it, then publish it.
    ///
    /// On any failure the in-memory config is left untouched.
    pub fn update<F>(&self, mutate: F) -> Result<PropagandaConfig>
    where
        F: FnOnce(&mut PropagandaConfig),
    {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = guard.clone();
        mutate(&mut next);
        next.validate()?;
        write_atomically(&self.path, &next)?;
        *guard = next.clone();
        info!(path = %self.path.display(), "bot configuration saved");
        Ok(next)
    }
}

/// Write `config` to a sibling temp file and rename it over `path`.
fn write_atomically(path: &Path, config: &PropagandaConfig) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    serde_json::to_writer_pretty(&mut tmp, config)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CoreError::Io(e.error))?;
    Ok(())
}
