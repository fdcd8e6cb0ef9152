//! Append-only artifact/finding persistence contracts.
//!
//! The core path exposes exactly two writes: artifact insert and finding
//! insert. There is no update or delete; duplicate rows from an
//! at-least-once re-run are tolerated by construction because every write
//! is an independent insert. Readers filter by job id through the artifact
//! `meta` bag and may observe eventual consistency.

use async_trait::async_trait;

use vantage_model::{ArtifactRecord, JobId, NewArtifact, NewFinding};

use crate::error::Result;

pub mod memory;
pub mod postgres;

/// Repository abstraction for the findings store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Insert one artifact row, returning its store-generated id.
    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<i64>;

    /// Insert one finding attached to an existing artifact. Fails with
    /// [`ScanError::ReferentialIntegrity`](crate::ScanError) and writes
    /// nothing when `artifact_id` does not resolve.
    async fn insert_finding(
        &self,
        artifact_id: i64,
        finding: &NewFinding,
    ) -> Result<i64>;

    /// All artifacts recorded for a job, oldest first. Later pipeline
    /// phases use this to consume target lists written by earlier phases;
    /// dashboards and report writers read the same way.
    async fn artifacts_for_job(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<ArtifactRecord>>;
}
