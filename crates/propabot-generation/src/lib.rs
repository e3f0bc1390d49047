//! `propabot-generation`: turns a prompt into a delivered poster.
//!
//! The [`pipeline::ContentPipeline`] writes a slogan with a
//! [`text::TextGenerator`], then walks the [`tokens::TokenPool`] in order,
//! handing each credential to an [`poller::ImageGenerator`] until one
//! produces a [`artifact::PosterArtifact`]. The artifact is uploaded to a
//! [`propabot_core::DeliveryTarget`] and deleted straight after.

pub mod artifact;
pub mod classify;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod poller;
pub mod text;
pub mod tokens;

pub use artifact::PosterArtifact;
pub use classify::{classify, classify_status, ErrorCategory};
pub use error::{JobError, PipelineError, TextError, TokenPoolError};
pub use pipeline::{report_failure, ContentPipeline, PosterOutcome, PosterRequest};
pub use poller::{ImageGenerator, JobPoller};
pub use text::{ChatTextGenerator, PassThrough, TextGenerator};
pub use tokens::TokenPool;
