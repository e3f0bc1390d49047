//! Where generated content ends up.
//!
//! Implemented by the Discord crate once for slash-command interactions and
//! once for plain channels (scheduler runs), so the pipeline never needs to
//! know which path invoked it.

use std::path::Path;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery target unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read artifact: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("platform rejected message: {0}")]
    Platform(String),
}

#[async_trait]
pub trait DeliveryTarget: Send + Sync {
    /// Short label for logs, e.g. `channel:123`.
    fn describe(&self) -> String;

    /// Acknowledge the request before a long-running operation.
    /// Targets without an acknowledgement step return `Ok(())`.
    async fn defer_ack(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    /// Post a plain text message.
    async fn send(&self, content: &str) -> Result<(), DeliveryError>;

    /// Upload the file at `path` as `filename`, with `caption` as message text.
    async fn send_file(
        &self,
        path: &Path,
        filename: &str,
        caption: &str,
    ) -> Result<(), DeliveryError>;
}
