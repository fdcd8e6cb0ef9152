//! Job submission facade used by API frontends and CLI tooling.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use vantage_model::{JobId, JobStatus, ScanJob, ScanTarget};

use crate::error::Result;
use crate::queue::JobQueue;

/// Accepts new jobs and answers status polls.
///
/// `submit` completes only after both the queue entry and the initial
/// `queued` status record exist, so a `status` call for the returned id is
/// immediately meaningful. Submitting the same id twice resets its status
/// to `queued`.
#[derive(Clone)]
pub struct JobSubmitter {
    queue: Arc<dyn JobQueue>,
}

impl fmt::Debug for JobSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSubmitter").finish_non_exhaustive()
    }
}

impl JobSubmitter {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    pub async fn submit(&self, job: &ScanJob) -> Result<()> {
        self.queue.enqueue(job).await?;
        info!(job = %job.id, target = job.target.label(), "job submitted");
        Ok(())
    }

    /// Mint a job for `target` and submit it in one step.
    pub async fn submit_target(&self, target: ScanTarget) -> Result<ScanJob> {
        let job = ScanJob::new(target);
        self.submit(&job).await?;
        Ok(job)
    }

    pub async fn status(&self, id: &JobId) -> Result<Option<JobStatus>> {
        self.queue.status(id).await
    }
}
