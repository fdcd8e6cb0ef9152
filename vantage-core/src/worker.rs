//! The per-process claim→process→ack loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pipeline::{
    JobVerdict, ModuleEnvironment, PipelineExecutor, PipelineOutcome,
};
use crate::queue::{AckOutcome, ClaimedJob, JobQueue, WorkerContext};
use crate::store::ArtifactStore;

/// How often a failed terminal-status write is retried before the loop
/// gives up and lets the reclaimer recover the job.
const ACK_ATTEMPTS: usize = 3;

/// Sleep/backoff tuning for the loop.
#[derive(Clone, Copy, Debug)]
pub struct WorkerTuning {
    /// Pause when the pending list is empty.
    pub idle_delay: Duration,
    /// Pause after a transient queue-store error.
    pub error_backoff: Duration,
}

impl Default for WorkerTuning {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_millis(500),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// One worker: claims one job at a time, runs the full pipeline to a
/// terminal verdict, acks, and only then claims the next. Horizontal
/// scale-out means more processes, each with its own owner id; the queue's
/// atomic move is the only coordination between them.
pub struct WorkerLoop {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ArtifactStore>,
    executor: Arc<PipelineExecutor>,
    env: ModuleEnvironment,
    worker: WorkerContext,
    tuning: WorkerTuning,
    shutdown: CancellationToken,
}

impl fmt::Debug for WorkerLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLoop")
            .field("worker", &self.worker)
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}

impl WorkerLoop {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn ArtifactStore>,
        executor: Arc<PipelineExecutor>,
        env: ModuleEnvironment,
        worker: WorkerContext,
        tuning: WorkerTuning,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            store,
            executor,
            env,
            worker,
            tuning,
            shutdown,
        }
    }

    pub async fn run(&self) {
        info!(
            owner = %self.worker.owner_id,
            phases = ?self.executor.phase_names(),
            "worker loop started"
        );
        loop {
            if self.shutdown.is_cancelled() {
                info!(owner = %self.worker.owner_id, "worker shutting down");
                break;
            }

            match self.queue.claim_next(&self.worker).await {
                Ok(Some(claim)) => self.process(claim).await,
                Ok(None) => {
                    tokio::time::sleep(self.tuning.idle_delay).await;
                }
                Err(err) => {
                    // Atomic-or-nothing queue ops: nothing to clean up,
                    // just come back later.
                    warn!(
                        owner = %self.worker.owner_id,
                        %err,
                        "claim failed; backing off"
                    );
                    tokio::time::sleep(self.tuning.error_backoff).await;
                }
            }
        }
    }

    async fn process(&self, claim: ClaimedJob) {
        info!(
            job = %claim.job.id,
            target = claim.job.target.label(),
            owner = %self.worker.owner_id,
            "processing job"
        );
        let ctx = self
            .env
            .context_for(claim.job.clone(), Arc::clone(&self.store));
        let outcome = self.executor.execute(&ctx).await;
        self.ack_with_retry(&claim, &outcome).await;
    }

    async fn ack_with_retry(
        &self,
        claim: &ClaimedJob,
        outcome: &PipelineOutcome,
    ) {
        let ack = match outcome.verdict {
            JobVerdict::Done => AckOutcome::Done {
                message: outcome.message.clone(),
                result_url: None,
            },
            JobVerdict::Failed => AckOutcome::Failed {
                message: outcome.message.clone(),
                error: outcome.error.clone(),
            },
        };

        for attempt in 1..=ACK_ATTEMPTS {
            match self
                .queue
                .ack(&self.worker, claim, ack.clone())
                .await
            {
                Ok(()) => {
                    info!(
                        job = %claim.job.id,
                        verdict = ?outcome.verdict,
                        findings = outcome.total_findings,
                        "job acked"
                    );
                    return;
                }
                Err(err) => {
                    warn!(
                        job = %claim.job.id,
                        attempt,
                        %err,
                        "ack failed"
                    );
                    tokio::time::sleep(self.tuning.error_backoff).await;
                }
            }
        }
        // The entry stays in our in-flight list; the reclaimer will requeue
        // it once it goes stale.
        warn!(
            job = %claim.job.id,
            "giving up on ack; leaving job for reclaim"
        );
    }
}
