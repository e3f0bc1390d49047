//! Routes presence edges to voice alerts.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use propabot_core::{ConfigStore, PropagandaConfig};
use propabot_discord::{VoiceError, VoicePlayer};
use propabot_presence::PresenceEvent;

pub const ALERT_OWNER: &str = "presence-alert";

/// Voice channel and clip for an alert, if both are configured.
fn alert_plan(config: &PropagandaConfig) -> Option<(u64, String)> {
    let channel = config.voice_channel_id?;
    let url = config.alert_media_url.as_deref().filter(|u| !u.is_empty())?;
    Some((channel, url.to_string()))
}

/// Play the alert clip for every event until the poller hangs up.
///
/// Each alert plays on its own task so a busy voice session rejects it
/// immediately instead of queueing it behind the current playback.
pub async fn route_alerts(
    mut events: mpsc::Receiver<PresenceEvent>,
    store: Arc<ConfigStore>,
    voice: Arc<VoicePlayer>,
) {
    while let Some(event) = events.recv().await {
        let name = event.display_name.as_deref().unwrap_or(&event.entity_id);
        let Some((channel_id, url)) = alert_plan(&store.snapshot()) else {
            debug!(entity = %event.entity_id, "no voice channel or alert clip configured, alert dropped");
            continue;
        };
        info!(entity = %event.entity_id, player = %name, channel_id, "playing presence alert");

        let voice = Arc::clone(&voice);
        tokio::spawn(async move {
            match voice.play(channel_id, &url, ALERT_OWNER).await {
                Ok(()) => {}
                Err(VoiceError::Busy { owner }) => {
                    info!(%owner, "voice busy, presence alert skipped")
                }
                Err(e) => warn!(err = %e, "presence alert failed"),
            }
        });
    }
    info!("alert router stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_needs_channel_and_clip() {
        let mut config = PropagandaConfig::default();
        assert_eq!(alert_plan(&config), None);

        config.voice_channel_id = Some(5);
        assert_eq!(alert_plan(&config), None);

        config.alert_media_url = Some(String::new());
        assert_eq!(alert_plan(&config), None);

        config.alert_media_url = Some("https://cdn.example/siren.mp3".into());
        assert_eq!(
            alert_plan(&config),
            Some((5, "https://cdn.example/siren.mp3".to_string()))
        );
    }

    #[tokio::test]
    async fn router_exits_when_poller_hangs_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::with_config(
            dir.path().join("c.json"),
            PropagandaConfig::default(),
        ));
        let voice = Arc::new(VoicePlayer::new(Arc::new(
            propabot_discord::CommandPlayer::new(vec![]),
        )));
        let (tx, rx) = mpsc::channel(4);
        let router = tokio::spawn(route_alerts(rx, store, voice));

        tx.send(PresenceEvent {
            entity_id: "1".into(),
            display_name: None,
        })
        .await
        .unwrap();
        drop(tx);

        tokio::time::timeout(std::time::Duration::from_secs(5), router)
            .await
            .unwrap()
            .unwrap();
    }
}
