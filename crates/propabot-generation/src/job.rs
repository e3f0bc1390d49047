use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle of one provider job.
///
/// Transitions only move forward:
/// `Submitted → Polling → {Completed | Failed | TimedOut}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Submitted, JobStatus::Polling)
                | (JobStatus::Polling, JobStatus::Completed)
                | (JobStatus::Polling, JobStatus::Failed)
                | (JobStatus::Polling, JobStatus::TimedOut)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Polling => "polling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// What the provider hands back on submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub poll_url: String,
}

/// URL of a finished output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn url(&self) -> &str {
        &self.0
    }
}

/// One in-flight generation request.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub prompt: String,
    pub handle: JobHandle,
    status: JobStatus,
    result: Option<ArtifactRef>,
    error: Option<String>,
}

impl GenerationJob {
    pub fn submitted(prompt: impl Into<String>, handle: JobHandle) -> Self {
        Self {
            prompt: prompt.into(),
            handle,
            status: JobStatus::Submitted,
            result: None,
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Present only once the job completed.
    pub fn result(&self) -> Option<&ArtifactRef> {
        self.result.as_ref()
    }

    /// Present only once the job failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn start_polling(&mut self) -> bool {
        self.advance(JobStatus::Polling)
    }

    pub fn complete(&mut self, output: ArtifactRef) -> bool {
        let moved = self.advance(JobStatus::Completed);
        if moved {
            self.result = Some(output);
        }
        moved
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        let moved = self.advance(JobStatus::Failed);
        if moved {
            self.error = Some(reason.into());
        }
        moved
    }

    pub fn time_out(&mut self) -> bool {
        self.advance(JobStatus::TimedOut)
    }

    /// Apply `next` if the transition is legal. Illegal transitions are logged and ignored.
    fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(job_id = %self.handle.id, from = %self.status, to = %next, "rejected job status transition");
            return false;
        }
        self.status = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> GenerationJob {
        GenerationJob::submitted(
            "UNITE",
            JobHandle {
                id: "j1".into(),
                poll_url: "http://x/j1".into(),
            },
        )
    }

    #[test]
    fn happy_path_is_monotonic() {
        let mut j = job();
        assert_eq!(j.status(), JobStatus::Submitted);
        assert!(j.start_polling());
        assert!(j.complete(ArtifactRef("http://x/out.png".into())));
        assert_eq!(j.status(), JobStatus::Completed);
        assert_eq!(j.result().unwrap().url(), "http://x/out.png");
        assert!(j.error().is_none());
    }

    #[test]
    fn cannot_complete_without_polling() {
        let mut j = job();
        assert!(!j.complete(ArtifactRef("u".into())));
        assert_eq!(j.status(), JobStatus::Submitted);
        assert!(j.result().is_none());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut j = job();
        j.start_polling();
        assert!(j.fail("nsfw"));
        assert!(j.status().is_terminal());
        assert!(!j.start_polling());
        assert!(!j.time_out());
        assert_eq!(j.error(), Some("nsfw"));
    }
}
