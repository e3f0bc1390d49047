use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use propabot_core::config::PresenceSettings;

use crate::error::PresenceError;
use crate::source::PresenceSource;
use crate::tracker::PresenceTracker;

/// An entity just entered the watched state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub entity_id: String,
    pub display_name: Option<String>,
}

pub struct PresencePoller {
    source: Arc<dyn PresenceSource>,
    entity_ids: Vec<String>,
    tracker: PresenceTracker,
    interval: Duration,
    backoff: Duration,
}

impl PresencePoller {
    pub fn new(source: Arc<dyn PresenceSource>, entity_ids: Vec<String>) -> Self {
        Self {
            source,
            entity_ids,
            tracker: PresenceTracker::new(),
            interval: Duration::from_secs(30),
            backoff: Duration::from_secs(5),
        }
    }

    pub fn with_timing(mut self, interval: Duration, backoff: Duration) -> Self {
        self.interval = interval;
        self.backoff = backoff;
        self
    }

    pub fn with_settings(self, settings: &PresenceSettings) -> Self {
        self.with_timing(
            Duration::from_secs(settings.interval_secs),
            Duration::from_secs(settings.backoff_secs),
        )
    }

    /// One batched fetch. Returns the edges it produced, in watch-list order.
    pub async fn poll_once(&mut self) -> Result<Vec<PresenceEvent>, PresenceError> {
        let observations = self.source.fetch(&self.entity_ids).await?;

        let mut events = Vec::new();
        for id in &self.entity_ids {
            // Entities missing from the response keep their previous record.
            let Some(obs) = observations.iter().find(|o| &o.entity_id == id) else {
                continue;
            };
            if self.tracker.observe(id, obs.in_watched_state) {
                events.push(PresenceEvent {
                    entity_id: id.clone(),
                    display_name: obs.display_name.clone(),
                });
            }
        }
        Ok(events)
    }

    /// Poll until `cancel` fires or the receiver goes away.
    ///
    /// Cancellation is honoured between cycles and while sleeping; a request
    /// already in flight is allowed to finish.
    pub async fn run(mut self, cancel: CancellationToken, events: mpsc::Sender<PresenceEvent>) {
        info!(
            entities = self.entity_ids.len(),
            interval_secs = self.interval.as_secs(),
            "presence poller started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let wait = if self.entity_ids.is_empty() {
                debug!("watch list empty, nothing to poll");
                self.interval
            } else {
                match self.poll_once().await {
                    Ok(edges) => {
                        for event in edges {
                            info!(entity = %event.entity_id, "watched game started");
                            if events.send(event).await.is_err() {
                                info!("presence receiver closed, poller exiting");
                                return;
                            }
                        }
                        self.interval
                    }
                    Err(e) => {
                        warn!(err = %e, backoff_secs = self.backoff.as_secs(), "presence poll failed");
                        self.backoff
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        info!("presence poller stopped");
    }

    /// Run on a background task.
    pub fn spawn(self, events: mpsc::Sender<PresenceEvent>) -> PollerHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone(), events));
        PollerHandle { cancel, task }
    }
}

pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(err = %e, "presence poller task ended abnormally");
        }
    }
}
