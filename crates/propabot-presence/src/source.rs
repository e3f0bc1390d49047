use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use propabot_core::config::PresenceSettings;

use crate::error::PresenceError;

/// Watched-condition state of one entity, as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub entity_id: String,
    pub display_name: Option<String>,
    pub in_watched_state: bool,
}

/// Batched presence lookup.
///
/// Entities the provider does not report are simply absent from the result.
#[async_trait]
pub trait PresenceSource: Send + Sync {
    async fn fetch(&self, entity_ids: &[String]) -> Result<Vec<Observation>, PresenceError>;
}

/// Steam Web API `GetPlayerSummaries`; an account is in the watched state
/// while its `gameid` equals the watched app id.
pub struct SteamPresence {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    watched_app_id: String,
}

impl SteamPresence {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        watched_app_id: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            watched_app_id: watched_app_id.into(),
        }
    }

    /// `None` when no API key is configured.
    pub fn from_settings(settings: &PresenceSettings, watched_app_id: &str) -> Option<Self> {
        let key = settings.api_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self::new(settings.base_url.clone(), key, watched_app_id))
    }
}

#[async_trait]
impl PresenceSource for SteamPresence {
    async fn fetch(&self, entity_ids: &[String]) -> Result<Vec<Observation>, PresenceError> {
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/ISteamUser/GetPlayerSummaries/v2/", self.base_url);
        let steamids = entity_ids.join(",");
        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("steamids", steamids.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PresenceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let summaries: SummariesResponse = resp
            .json()
            .await
            .map_err(|e| PresenceError::Parse(e.to_string()))?;
        debug!(players = summaries.response.players.len(), "presence fetched");

        Ok(summaries
            .response
            .players
            .into_iter()
            .map(|p| Observation {
                in_watched_state: p.gameid.as_deref() == Some(self.watched_app_id.as_str()),
                entity_id: p.steamid,
                display_name: p.personaname,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct SummariesResponse {
    response: PlayerList,
}

#[derive(Debug, Deserialize)]
struct PlayerList {
    #[serde(default)]
    players: Vec<Player>,
}

#[derive(Debug, Deserialize)]
struct Player {
    steamid: String,
    #[serde(default)]
    personaname: Option<String>,
    #[serde(default)]
    gameid: Option<String>,
}
