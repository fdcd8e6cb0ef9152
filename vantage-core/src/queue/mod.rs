//! Queue store contracts shared by the Redis and in-memory backends.
//!
//! The queue is the system's only cross-process coordination point: one
//! global pending list, one private in-flight list per worker, and one
//! status hash per job id. Every mutation is a single atomic store
//! operation; callers never perform read-modify-write sequences.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vantage_model::{JobId, JobStatus, ScanJob};

use crate::error::Result;

pub mod memory;
pub mod redis;

/// Explicit worker identity threaded into every queue call.
///
/// Constructed once at process start; there is no ambient/global owner id.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkerContext {
    pub owner_id: String,
}

impl WorkerContext {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
        }
    }

    /// Owner id derived from a group label and the current pid, so several
    /// worker processes on one host stay distinguishable.
    pub fn for_process(group: &str) -> Self {
        Self::new(format!("{}-{}", group, std::process::id()))
    }
}

/// A job handed to exactly one worker by `claim_next`.
///
/// Carries the raw payload string alongside the parsed job: the ack path
/// removes the in-flight entry by value, so the bytes that were moved must
/// round-trip untouched.
#[derive(Clone, Debug)]
pub struct ClaimedJob {
    pub job: ScanJob,
    pub raw: String,
}

/// Terminal outcome reported back through `ack`.
#[derive(Clone, Debug)]
pub enum AckOutcome {
    Done {
        message: String,
        result_url: Option<String>,
    },
    Failed {
        message: String,
        error: Option<String>,
    },
}

/// Durable queue backend contract.
///
/// Implementations must keep every operation atomic-or-nothing: a transient
/// backend error leaves the job exactly where it was.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append the job to the global pending list and (re)set its status
    /// record to `queued`. Re-submitting an existing id resets its status.
    async fn enqueue(&self, job: &ScanJob) -> Result<()>;

    /// Atomically move the head of the pending list into `worker`'s
    /// in-flight list. Returns `None` when the pending list is empty.
    ///
    /// A payload that fails to parse is routed to the dead-letter list and
    /// the claim retries immediately; callers never see malformed entries.
    async fn claim_next(
        &self,
        worker: &WorkerContext,
    ) -> Result<Option<ClaimedJob>>;

    /// Remove the claimed entry from `worker`'s in-flight list and write the
    /// terminal status. The status write proceeds even when the entry is
    /// already gone (e.g. reclaimed meanwhile): status is the authoritative
    /// record, not list membership.
    async fn ack(
        &self,
        worker: &WorkerContext,
        claim: &ClaimedJob,
        outcome: AckOutcome,
    ) -> Result<()>;

    /// Sweep every owner's in-flight list and move entries older than
    /// `stale_after` back to the pending list, resetting their status to
    /// `queued` with a "reclaimed" message. Malformed entries go to the
    /// dead-letter list; the sweep itself never fails on them. Returns the
    /// number of jobs requeued.
    async fn reclaim_stale(
        &self,
        stale_after: chrono::Duration,
    ) -> Result<usize>;

    /// Status record for a job id, or `None` for an unknown id.
    async fn status(&self, id: &JobId) -> Result<Option<JobStatus>>;
}

/// Key layout shared by queue backends and operational tooling.
#[derive(Debug, Clone, Copy)]
pub struct QueueKeys;

impl QueueKeys {
    pub fn pending() -> &'static str {
        "vantage:jobs:pending"
    }

    pub fn inflight(owner_id: &str) -> String {
        format!("vantage:jobs:inflight:{owner_id}")
    }

    pub fn inflight_pattern() -> &'static str {
        "vantage:jobs:inflight:*"
    }

    pub fn dead_letter() -> &'static str {
        "vantage:jobs:dead"
    }

    pub fn status(id: &JobId) -> String {
        format!("vantage:status:{id}")
    }
}
