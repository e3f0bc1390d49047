use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a firing happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireKind {
    /// The trigger reached the slot.
    Scheduled,
    /// Configured shortly after today's slot and nothing ran for it yet.
    CatchUp,
}

impl std::fmt::Display for FireKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FireKind::Scheduled => "scheduled",
            FireKind::CatchUp => "catch_up",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FireKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(FireKind::Scheduled),
            "catch_up" => Ok(FireKind::CatchUp),
            other => Err(format!("unknown fire kind: {other}")),
        }
    }
}

/// One invocation handed to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    /// UUID v4, primary key of the ledger row.
    pub run_id: String,
    pub job: String,
    /// The daily slot this run belongs to (UTC).
    pub slot: DateTime<Utc>,
    pub kind: FireKind,
}

impl Firing {
    pub fn new(job: impl Into<String>, slot: DateTime<Utc>, kind: FireKind) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            job: job.into(),
            slot,
            kind,
        }
    }
}

/// Final (or current) state of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Runner still executing.
    Running,
    Succeeded,
    /// Runner returned an error.
    Failed,
    /// Runner task panicked.
    Panicked,
    /// Trigger woke past the misfire grace; slot skipped.
    Missed,
    /// Previous run still in flight; firing skipped.
    Overlapped,
}

impl RunOutcome {
    /// Whether the runner was actually invoked for this row.
    pub fn invoked(self) -> bool {
        matches!(
            self,
            RunOutcome::Running | RunOutcome::Succeeded | RunOutcome::Failed | RunOutcome::Panicked
        )
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunOutcome::Running => "running",
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Failed => "failed",
            RunOutcome::Panicked => "panicked",
            RunOutcome::Missed => "missed",
            RunOutcome::Overlapped => "overlapped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunOutcome::Running),
            "succeeded" => Ok(RunOutcome::Succeeded),
            "failed" => Ok(RunOutcome::Failed),
            "panicked" => Ok(RunOutcome::Panicked),
            "missed" => Ok(RunOutcome::Missed),
            "overlapped" => Ok(RunOutcome::Overlapped),
            other => Err(format!("unknown run outcome: {other}")),
        }
    }
}

/// A persisted ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub job: String,
    pub slot: DateTime<Utc>,
    pub kind: FireKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    /// Error text for failed, panicked and skipped rows.
    pub detail: Option<String>,
}
