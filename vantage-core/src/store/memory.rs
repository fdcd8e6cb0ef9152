use std::fmt;

use chrono::Utc;
use tokio::sync::Mutex;

use vantage_model::{
    ArtifactRecord, FindingRecord, JobId, NewArtifact, NewFinding,
};

use crate::error::{Result, ScanError};
use crate::store::ArtifactStore;

#[derive(Default)]
struct StoreState {
    artifacts: Vec<ArtifactRecord>,
    findings: Vec<FindingRecord>,
    next_artifact_id: i64,
    next_finding_id: i64,
}

/// In-process findings store with the same contract as the Postgres
/// backend, including referential-integrity enforcement on finding
/// inserts. Used by the test suite.
#[derive(Default)]
pub struct MemoryArtifactStore {
    state: Mutex<StoreState>,
}

impl fmt::Debug for MemoryArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryArtifactStore").finish_non_exhaustive()
    }
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every artifact row, insertion order.
    pub async fn artifacts(&self) -> Vec<ArtifactRecord> {
        self.state.lock().await.artifacts.clone()
    }

    /// Every finding row, insertion order.
    pub async fn findings(&self) -> Vec<FindingRecord> {
        self.state.lock().await.findings.clone()
    }
}

#[async_trait::async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.next_artifact_id += 1;
        let id = state.next_artifact_id;
        state.artifacts.push(ArtifactRecord {
            id,
            kind: artifact.kind.clone(),
            val_text: artifact.val_text.clone(),
            severity: artifact.severity,
            src_url: artifact.src_url.clone(),
            sha256: artifact.sha256.clone(),
            mime: artifact.mime.clone(),
            meta: artifact.meta.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn insert_finding(
        &self,
        artifact_id: i64,
        finding: &NewFinding,
    ) -> Result<i64> {
        let mut state = self.state.lock().await;
        if !state.artifacts.iter().any(|a| a.id == artifact_id) {
            return Err(ScanError::ReferentialIntegrity(artifact_id));
        }
        state.next_finding_id += 1;
        let id = state.next_finding_id;
        state.findings.push(FindingRecord {
            id,
            artifact_id,
            finding_type: finding.finding_type.clone(),
            recommendation: finding.recommendation.clone(),
            description: finding.description.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn artifacts_for_job(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<ArtifactRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .artifacts
            .iter()
            .filter(|a| {
                a.meta.get("job_id").and_then(|v| v.as_str())
                    == Some(job_id.as_str())
            })
            .cloned()
            .collect())
    }
}
