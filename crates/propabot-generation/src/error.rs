use propabot_core::DeliveryError;

use crate::classify::{classify, classify_status, ErrorCategory};

/// The credential list was empty when the pool was built.
#[derive(Debug, thiserror::Error)]
pub enum TokenPoolError {
    #[error("no credentials configured")]
    Empty,
}

/// Failure of a single submit → poll → download cycle with one credential.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to create image ({status}): {body}")]
    Submission { status: u16, body: String },

    #[error("failed to get result ({status}): {body}")]
    PollTransport { status: u16, body: String },

    #[error("image generation failed: {reason}")]
    JobFailed { reason: String },

    #[error("timeout waiting for image generation after {attempts} polls")]
    JobTimedOut { attempts: u32 },

    #[error("failed to download generated image ({status})")]
    Download { status: u16 },

    #[error("unexpected provider response: {0}")]
    Parse(String),

    #[error("artifact I/O error: {0}")]
    Artifact(#[from] std::io::Error),
}

impl JobError {
    /// HTTP status reported by the provider, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            JobError::Submission { status, .. }
            | JobError::PollTransport { status, .. }
            | JobError::Download { status } => Some(*status),
            JobError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Status code first; error text only when the code says nothing.
    pub fn category(&self) -> ErrorCategory {
        if let JobError::Http(e) = self {
            if e.is_timeout() {
                return ErrorCategory::Timeout;
            }
        }
        if matches!(self, JobError::JobTimedOut { .. }) {
            return ErrorCategory::Timeout;
        }
        self.status()
            .and_then(classify_status)
            .unwrap_or_else(|| classify(&self.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TextError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("text generator returned no usable text")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("text generation failed: {0}")]
    TextGeneration(#[from] TextError),

    #[error("all credentials exhausted after {attempts} attempt(s); last error: {last_error}")]
    CredentialExhausted {
        attempts: u32,
        last_error: String,
        category: ErrorCategory,
    },

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::CredentialExhausted { category, .. } => *category,
            PipelineError::TextGeneration(TextError::Api { status, message }) => {
                classify_status(*status).unwrap_or_else(|| classify(message))
            }
            other => classify(&other.to_string()),
        }
    }
}
