use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Direction, Script, aio::ConnectionManager};
use tracing::{debug, info, warn};

use vantage_model::{JobId, JobState, JobStatus, ScanJob};

use crate::error::{Result, ScanError};
use crate::queue::{
    AckOutcome, ClaimedJob, JobQueue, QueueKeys, WorkerContext,
};

/// Moves one in-flight entry back to the pending list, but only if it is
/// still present: LREM and RPUSH run inside a single script so two
/// overlapping sweeps can never requeue the same entry twice.
fn reclaim_move_script() -> Script {
    Script::new(
        r#"
        local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
        if removed > 0 then
            redis.call('RPUSH', KEYS[2], ARGV[1])
        end
        return removed
        "#,
    )
}

/// Redis-backed queue store.
///
/// One global pending list, one in-flight list per owner, one status hash
/// per job id, and a dead-letter list for payloads that fail validation.
/// The `LMOVE` in [`claim_next`](JobQueue::claim_next) is the system's sole
/// concurrency-control primitive.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisJobQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis queue at {}", redis_url);

        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        info!("Successfully connected to Redis queue");

        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn status_fields(
        state: JobState,
        message: Option<&str>,
        error: Option<&str>,
        result_url: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("state", state.as_str().to_string()),
            ("updated_at", Utc::now().to_rfc3339()),
        ];
        if let Some(message) = message {
            fields.push(("message", message.to_string()));
        }
        if let Some(error) = error {
            fields.push(("error", error.to_string()));
        }
        if let Some(result_url) = result_url {
            fields.push(("result_url", result_url.to_string()));
        }
        fields
    }

    async fn write_status(
        &self,
        id: &JobId,
        state: JobState,
        message: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let fields = Self::status_fields(state, message, None, None);
        conn.hset_multiple::<_, _, _, ()>(QueueKeys::status(id), &fields)
            .await?;
        Ok(())
    }

    /// Route a payload that failed validation to the dead-letter list,
    /// removing it from wherever it currently sits.
    async fn dead_letter(&self, source_key: &str, raw: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lrem(source_key, 1, raw)
            .ignore()
            .rpush(QueueKeys::dead_letter(), raw)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    fn status_from_hash(
        id: &JobId,
        mut hash: HashMap<String, String>,
    ) -> Result<JobStatus> {
        let state = hash
            .remove("state")
            .ok_or_else(|| {
                ScanError::Internal(format!(
                    "status hash for {id} is missing its state field"
                ))
            })?
            .parse::<JobState>()
            .map_err(ScanError::Internal)?;
        let updated_at = match hash.remove("updated_at") {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| {
                    ScanError::Internal(format!(
                        "bad updated_at for {id}: {e}"
                    ))
                })?
                .with_timezone(&Utc),
            None => Utc::now(),
        };
        Ok(JobStatus {
            id: id.clone(),
            state,
            updated_at,
            message: hash.remove("message"),
            result_url: hash.remove("result_url"),
            error: hash.remove("error"),
        })
    }
}

#[async_trait::async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &ScanJob) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        let status_key = QueueKeys::status(&job.id);
        let fields = Self::status_fields(JobState::Queued, None, None, None);

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .rpush(QueueKeys::pending(), &payload)
            .ignore()
            .del(&status_key)
            .ignore()
            .hset_multiple(&status_key, &fields)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job = %job.id, target = job.target.label(), "job enqueued");
        Ok(())
    }

    async fn claim_next(
        &self,
        worker: &WorkerContext,
    ) -> Result<Option<ClaimedJob>> {
        let inflight = QueueKeys::inflight(&worker.owner_id);
        let mut conn = self.conn.clone();

        loop {
            let moved: Option<String> = conn
                .lmove(
                    QueueKeys::pending(),
                    inflight.as_str(),
                    Direction::Left,
                    Direction::Right,
                )
                .await?;
            let Some(raw) = moved else {
                return Ok(None);
            };

            match serde_json::from_str::<ScanJob>(&raw) {
                Ok(job) => {
                    self.write_status(&job.id, JobState::Processing, None)
                        .await?;
                    debug!(
                        job = %job.id,
                        owner = %worker.owner_id,
                        "job claimed"
                    );
                    return Ok(Some(ClaimedJob { job, raw }));
                }
                Err(err) => {
                    warn!(
                        owner = %worker.owner_id,
                        %err,
                        "dead-lettering malformed queue payload"
                    );
                    self.dead_letter(&inflight, &raw).await?;
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
        let inflight = QueueKeys::inflight(&worker.owner_id);
        let status_key = QueueKeys::status(&claim.job.id);
        let fields = match &outcome {
            AckOutcome::Done {
                message,
                result_url,
            } => Self::status_fields(
                JobState::Done,
                Some(message),
                None,
                result_url.as_deref(),
            ),
            AckOutcome::Failed { message, error } => Self::status_fields(
                JobState::Failed,
                Some(message),
                error.as_deref(),
                None,
            ),
        };

        // LREM count of zero means the entry was already removed, e.g. by a
        // concurrent reclaim; the status write still lands.
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lrem(&inflight, 1, &claim.raw)
            .ignore()
            .hset_multiple(&status_key, &fields)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job = %claim.job.id, owner = %worker.owner_id, "job acked");
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        stale_after: chrono::Duration,
    ) -> Result<usize> {
        let mut conn = self.conn.clone();
        let script = reclaim_move_script();
        let owners: Vec<String> =
            conn.keys(QueueKeys::inflight_pattern()).await?;

        let mut reclaimed = 0usize;
        for inflight_key in owners {
            let entries: Vec<String> =
                conn.lrange(&inflight_key, 0, -1).await?;
            for raw in entries {
                let job = match serde_json::from_str::<ScanJob>(&raw) {
                    Ok(job) => job,
                    Err(err) => {
                        warn!(
                            key = %inflight_key,
                            %err,
                            "dead-lettering malformed in-flight entry"
                        );
                        if let Err(err) =
                            self.dead_letter(&inflight_key, &raw).await
                        {
                            warn!(%err, "failed to dead-letter entry");
                        }
                        continue;
                    }
                };

                if Utc::now() - job.created_at <= stale_after {
                    continue;
                }

                let moved: i64 = script
                    .key(inflight_key.as_str())
                    .key(QueueKeys::pending())
                    .arg(&raw)
                    .invoke_async(&mut conn)
                    .await?;
                if moved > 0 {
                    reclaimed += 1;
                    self.write_status(
                        &job.id,
                        JobState::Queued,
                        Some("reclaimed after stale worker timeout"),
                    )
                    .await?;
                    warn!(
                        job = %job.id,
                        key = %inflight_key,
                        "reclaimed stale job"
                    );
                }
            }
        }

        Ok(reclaimed)
    }

    async fn status(&self, id: &JobId) -> Result<Option<JobStatus>> {
        let mut conn = self.conn.clone();
        let hash: HashMap<String, String> =
            conn.hgetall(QueueKeys::status(id)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        Self::status_from_hash(id, hash).map(Some)
    }
}
