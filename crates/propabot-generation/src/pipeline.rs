use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use propabot_core::{DeliveryTarget, PropagandaConfig};

use crate::artifact::PosterArtifact;
use crate::classify::ErrorCategory;
use crate::error::PipelineError;
use crate::poller::ImageGenerator;
use crate::text::TextGenerator;
use crate::tokens::TokenPool;

/// Everything one poster run needs, snapshotted from the persisted config.
#[derive(Debug, Clone)]
pub struct PosterRequest {
    pub text_prompt: String,
    pub image_style: String,
    pub image_theme: String,
    pub caption: String,
    pub credentials: Vec<String>,
    /// Rounds over the credential list.
    pub max_retries: u32,
}

impl PosterRequest {
    pub fn from_config(config: &PropagandaConfig) -> Self {
        Self {
            text_prompt: config.text_prompt.clone(),
            image_style: config.image_style.clone(),
            image_theme: config.image_theme.clone(),
            caption: config.poster_caption.clone(),
            credentials: config.credentials.clone(),
            max_retries: config.max_retries,
        }
    }

    pub fn image_prompt(&self, slogan: &str) -> String {
        format!(
            "A {} poster. {}. Theme: {}",
            self.image_style, slogan, self.image_theme
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosterOutcome {
    pub slogan: String,
    /// Position of the credential that succeeded.
    pub credential_index: usize,
    /// Image generator calls made, successful one included.
    pub attempts: u32,
}

pub struct ContentPipeline {
    text: Arc<dyn TextGenerator>,
    image: Arc<dyn ImageGenerator>,
    round_backoff: Duration,
}

impl ContentPipeline {
    pub fn new(text: Arc<dyn TextGenerator>, image: Arc<dyn ImageGenerator>) -> Self {
        Self {
            text,
            image,
            round_backoff: Duration::from_secs(2),
        }
    }

    pub fn with_round_backoff(mut self, backoff: Duration) -> Self {
        self.round_backoff = backoff;
        self
    }

    /// Produce a poster, failing over across credentials.
    ///
    /// Credentials are tried strictly one after another in list order. A new
    /// round only starts once every candidate of the previous one failed.
    /// Credentials rejected for authentication sit out the remaining rounds.
    pub async fn generate(
        &self,
        request: &PosterRequest,
    ) -> Result<(PosterArtifact, PosterOutcome), PipelineError> {
        let pool = TokenPool::new(request.credentials.clone()).map_err(|e| {
            PipelineError::CredentialExhausted {
                attempts: 0,
                last_error: e.to_string(),
                category: ErrorCategory::Authentication,
            }
        })?;

        let slogan = self.text.generate(&request.text_prompt).await?;
        let prompt = request.image_prompt(&slogan);
        info!(generator = %self.text.name(), credentials = pool.len(), "generating poster");

        let rounds = request.max_retries.max(1);
        let mut banned: HashSet<String> = HashSet::new();
        let mut attempts: u32 = 0;
        let mut last: Option<(String, ErrorCategory)> = None;

        for round in 1..=rounds {
            if round > 1 {
                if pool.next_candidate(&banned).is_none() {
                    break;
                }
                tokio::time::sleep(self.round_backoff * (round - 1)).await;
            }

            let mut tried = banned.clone();
            while let Some(credential) = pool.next_candidate(&tried) {
                let credential = credential.to_string();
                let index = pool.index_of(&credential).unwrap_or_default();
                tried.insert(credential.clone());
                attempts += 1;

                match self.image.generate(&prompt, &credential).await {
                    Ok(artifact) => {
                        if attempts > 1 {
                            info!(credential_index = index, round, attempts, "poster generated after failover");
                        } else {
                            info!(credential_index = index, "poster generated");
                        }
                        let outcome = PosterOutcome {
                            slogan,
                            credential_index: index,
                            attempts,
                        };
                        return Ok((artifact, outcome));
                    }
                    Err(e) => {
                        let category = e.category();
                        warn!(
                            credential_index = index,
                            round,
                            %category,
                            err = %e,
                            "image generation failed with credential"
                        );
                        if category == ErrorCategory::Authentication {
                            banned.insert(credential);
                        }
                        last = Some((e.to_string(), category));
                    }
                }
            }
        }

        let (last_error, category) =
            last.unwrap_or_else(|| ("no usable credentials".to_string(), ErrorCategory::Unknown));
        warn!(attempts, %category, "all credentials exhausted");
        Err(PipelineError::CredentialExhausted {
            attempts,
            last_error,
            category,
        })
    }

    /// Generate a poster and upload it to `target`.
    ///
    /// The staged file is deleted whether or not the upload succeeds.
    pub async fn generate_and_deliver(
        &self,
        request: &PosterRequest,
        target: &dyn DeliveryTarget,
    ) -> Result<PosterOutcome, PipelineError> {
        if let Err(e) = target.defer_ack().await {
            warn!(delivery = %target.describe(), err = %e, "failed to acknowledge request");
        }

        let (artifact, outcome) = self.generate(request).await?;

        let caption = format!("**{}**", request.caption);
        let delivered = target
            .send_file(artifact.path(), &artifact.file_name(), &caption)
            .await;
        artifact.release().await;
        delivered?;

        info!(delivery = %target.describe(), attempts = outcome.attempts, "poster delivered");
        Ok(outcome)
    }
}

/// Tell the user what went wrong, in words they can act on.
pub async fn report_failure(target: &dyn DeliveryTarget, err: &PipelineError) {
    let message = err.category().user_message();
    if let Err(e) = target.send(message).await {
        warn!(delivery = %target.describe(), err = %e, "failed to report pipeline failure");
    }
}
