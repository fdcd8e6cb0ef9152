use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use vantage_model::{JobId, JobState, JobStatus, ScanJob};

use crate::error::Result;
use crate::queue::{AckOutcome, ClaimedJob, JobQueue, WorkerContext};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    inflight: HashMap<String, Vec<String>>,
    status: HashMap<JobId, JobStatus>,
    dead_letter: Vec<String>,
}

/// In-process queue backend with the same semantics as the Redis store.
///
/// Used by the test suite and by single-process deployments that do not
/// need cross-process workers. Entries are stored as raw payload strings so
/// malformed-payload handling matches the durable backend exactly.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
}

impl fmt::Debug for MemoryJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryJobQueue").finish_non_exhaustive()
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw payload straight onto the pending list, bypassing
    /// serialization. Simulates foreign producers writing directly to the
    /// queue backend.
    pub async fn push_raw(&self, raw: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.pending.push_back(raw.into());
    }

    /// Dead-lettered payloads, oldest first.
    pub async fn dead_letters(&self) -> Vec<String> {
        self.state.lock().await.dead_letter.clone()
    }

    /// Snapshot of one owner's in-flight list.
    pub async fn inflight_for(&self, owner_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .inflight
            .get(owner_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Depth of the global pending list.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    fn set_status(
        state: &mut QueueState,
        id: &JobId,
        job_state: JobState,
        message: Option<String>,
    ) {
        let entry =
            state.status.entry(id.clone()).or_insert_with(|| {
                JobStatus::queued(id.clone())
            });
        entry.state = job_state;
        entry.updated_at = Utc::now();
        if message.is_some() {
            entry.message = message;
        }
    }
}

#[async_trait::async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &ScanJob) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        let mut state = self.state.lock().await;
        state.pending.push_back(payload);
        state
            .status
            .insert(job.id.clone(), JobStatus::queued(job.id.clone()));
        debug!(job = %job.id, "job enqueued");
        Ok(())
    }

    async fn claim_next(
        &self,
        worker: &WorkerContext,
    ) -> Result<Option<ClaimedJob>> {
        let mut state = self.state.lock().await;
        loop {
            let Some(raw) = state.pending.pop_front() else {
                return Ok(None);
            };

            match serde_json::from_str::<ScanJob>(&raw) {
                Ok(job) => {
                    state
                        .inflight
                        .entry(worker.owner_id.clone())
                        .or_default()
                        .push(raw.clone());
                    Self::set_status(
                        &mut state,
                        &job.id,
                        JobState::Processing,
                        None,
                    );
                    return Ok(Some(ClaimedJob { job, raw }));
                }
                Err(err) => {
                    warn!(
                        owner = %worker.owner_id,
                        %err,
                        "dead-lettering malformed queue payload"
                    );
                    state.dead_letter.push(raw);
                }
            }
        }
    }

    async fn ack(
        &self,
        worker: &WorkerContext,
        claim: &ClaimedJob,
        outcome: AckOutcome,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(list) = state.inflight.get_mut(&worker.owner_id)
            && let Some(pos) = list.iter().position(|e| e == &claim.raw)
        {
            list.remove(pos);
        }

        // Entry may already be gone (reclaimed); the status write is still
        // authoritative.
        let (job_state, message, error, result_url) = match outcome {
            AckOutcome::Done {
                message,
                result_url,
            } => (JobState::Done, message, None, result_url),
            AckOutcome::Failed { message, error } => {
                (JobState::Failed, message, error, None)
            }
        };
        Self::set_status(
            &mut state,
            &claim.job.id,
            job_state,
            Some(message),
        );
        if let Some(status) = state.status.get_mut(&claim.job.id) {
            status.error = error;
            status.result_url = result_url;
        }
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        stale_after: chrono::Duration,
    ) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut reclaimed = 0usize;
        let owners: Vec<String> = state.inflight.keys().cloned().collect();

        for owner in owners {
            let entries = state
                .inflight
                .get(&owner)
                .cloned()
                .unwrap_or_default();
            for raw in entries {
                let job = match serde_json::from_str::<ScanJob>(&raw) {
                    Ok(job) => job,
                    Err(err) => {
                        warn!(
                            owner = %owner,
                            %err,
                            "dead-lettering malformed in-flight entry"
                        );
                        if let Some(list) = state.inflight.get_mut(&owner)
                            && let Some(pos) =
                                list.iter().position(|e| e == &raw)
                        {
                            list.remove(pos);
                        }
                        state.dead_letter.push(raw);
                        continue;
                    }
                };

                if Utc::now() - job.created_at <= stale_after {
                    continue;
                }

                let removed = if let Some(list) =
                    state.inflight.get_mut(&owner)
                    && let Some(pos) = list.iter().position(|e| e == &raw)
                {
                    list.remove(pos);
                    true
                } else {
                    false
                };
                if removed {
                    state.pending.push_back(raw);
                    reclaimed += 1;
                    Self::set_status(
                        &mut state,
                        &job.id,
                        JobState::Queued,
                        Some(
                            "reclaimed after stale worker timeout"
                                .to_string(),
                        ),
                    );
                    warn!(job = %job.id, owner = %owner, "reclaimed stale job");
                }
            }
        }

        Ok(reclaimed)
    }

    async fn status(&self, id: &JobId) -> Result<Option<JobStatus>> {
        Ok(self.state.lock().await.status.get(id).cloned())
    }
}
