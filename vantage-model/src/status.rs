use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::JobId;

/// Lifecycle states of a job's status record.
///
/// Transitions are monotonic forward (`Queued` → `Processing` →
/// `Done`/`Failed`) with a single backward edge, `Processing` → `Queued`,
/// taken only when a stale claim is reclaimed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    /// Terminal states never transition further on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "processing" => Ok(JobState::Processing),
            "done" => Ok(JobState::Done),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// The poll-visible status record kept per job id.
///
/// Created alongside the job at submission and mutated in place through the
/// run; never deleted. This record, not queue list membership, is the
/// authoritative account of where a job ended up.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub updated_at: DateTime<Utc>,
    pub message: Option<String>,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn queued(id: JobId) -> Self {
        Self {
            id,
            state: JobState::Queued,
            updated_at: Utc::now(),
            message: None,
            result_url: None,
            error: None,
        }
    }
}
