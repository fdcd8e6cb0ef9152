use std::fmt;
use std::sync::Arc;

use tokio::sync::Semaphore;

use vantage_model::ScanJob;

use crate::store::ArtifactStore;

/// Credentials handed to scan modules that talk to external services.
///
/// A module whose mandatory credential is absent fails the whole job with a
/// fatal precondition rather than limping through its phase.
#[derive(Clone, Debug, Default)]
pub struct ScanCredentials {
    pub shodan_api_key: Option<String>,
}

/// Everything a scan module needs to work one job.
///
/// The semaphore caps a module's internal fan-out (concurrent outbound
/// calls); the executor itself never parallelizes across phases. Modules
/// must attach an explicit timeout to every external call they make.
#[derive(Clone)]
pub struct JobContext {
    pub job: ScanJob,
    pub store: Arc<dyn ArtifactStore>,
    pub http: reqwest::Client,
    pub limiter: Arc<Semaphore>,
    pub credentials: ScanCredentials,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job", &self.job.id)
            .field("limiter_permits", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

/// Shared per-process module plumbing, minting one [`JobContext`] per
/// claimed job.
#[derive(Clone)]
pub struct ModuleEnvironment {
    pub http: reqwest::Client,
    pub limiter: Arc<Semaphore>,
    pub credentials: ScanCredentials,
}

impl fmt::Debug for ModuleEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEnvironment")
            .field("limiter_permits", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

impl ModuleEnvironment {
    pub fn new(
        http: reqwest::Client,
        module_concurrency: usize,
        credentials: ScanCredentials,
    ) -> Self {
        Self {
            http,
            limiter: Arc::new(Semaphore::new(module_concurrency.max(1))),
            credentials,
        }
    }

    pub fn context_for(
        &self,
        job: ScanJob,
        store: Arc<dyn ArtifactStore>,
    ) -> JobContext {
        JobContext {
            job,
            store,
            http: self.http.clone(),
            limiter: Arc::clone(&self.limiter),
            credentials: self.credentials.clone(),
        }
    }
}
