use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use vantage_model::{ArtifactRecord, JobId, NewArtifact, NewFinding};

use crate::error::{Result, ScanError};
use crate::store::ArtifactStore;

/// PostgreSQL-backed findings store.
///
/// Schema provisioning lives outside the engine; construction only
/// validates connectivity. Writes are independent row inserts, so
/// concurrent sub-tasks within a phase need no cross-row transaction.
#[derive(Clone, Debug)]
pub struct PostgresArtifactStore {
    pool: PgPool,
}

impl PostgresArtifactStore {
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await?;
        info!("Connected to findings store");
        Ok(Self { pool })
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn artifact_from_row(row: PgRow) -> Result<ArtifactRecord> {
        let severity: String = row.try_get("severity")?;
        Ok(ArtifactRecord {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            val_text: row.try_get("val_text")?,
            severity: severity.parse().map_err(ScanError::Internal)?,
            src_url: row.try_get("src_url")?,
            sha256: row.try_get("sha256")?,
            mime: row.try_get("mime")?,
            meta: row.try_get("meta")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ArtifactStore for PostgresArtifactStore {
    async fn insert_artifact(&self, artifact: &NewArtifact) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO artifacts (
                kind, val_text, severity, src_url, sha256, mime, meta
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&artifact.kind)
        .bind(&artifact.val_text)
        .bind(artifact.severity.as_str())
        .bind(&artifact.src_url)
        .bind(&artifact.sha256)
        .bind(&artifact.mime)
        .bind(&artifact.meta)
        .fetch_one(self.pool())
        .await?;

        debug!(artifact_id = id, kind = artifact.kind, "artifact inserted");
        Ok(id)
    }

    async fn insert_finding(
        &self,
        artifact_id: i64,
        finding: &NewFinding,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO findings (
                artifact_id, finding_type, recommendation, description
            )
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(artifact_id)
        .bind(&finding.finding_type)
        .bind(&finding.recommendation)
        .bind(&finding.description)
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            let fk = e
                .as_database_error()
                .is_some_and(|db| db.is_foreign_key_violation());
            if fk {
                ScanError::ReferentialIntegrity(artifact_id)
            } else {
                ScanError::Database(e)
            }
        })?;

        debug!(finding_id = id, artifact_id, "finding inserted");
        Ok(id)
    }

    async fn artifacts_for_job(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<ArtifactRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, val_text, severity, src_url, sha256, mime,
                   meta, created_at
            FROM artifacts
            WHERE meta->>'job_id' = $1
            ORDER BY id
            "#,
        )
        .bind(job_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(Self::artifact_from_row).collect()
    }
}
