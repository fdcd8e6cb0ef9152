//! End-to-end orchestration behaviour over the in-memory backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use tokio_util::sync::CancellationToken;

use vantage_core::worker::WorkerTuning;
use vantage_core::{
    ArtifactStore, JobContext, JobQueue, JobSubmitter, JobVerdict,
    MemoryArtifactStore, MemoryJobQueue, ModuleEnvironment,
    PhaseDescriptor, PipelineExecutor, ScanCredentials, ScanError,
    ScanModule, WorkerContext, WorkerLoop, empty_is_clean,
};
use vantage_model::{
    ArtifactRecord, JobId, JobState, JobStatus, NewArtifact, NewFinding,
    ScanJob, ScanTarget, Severity,
};

fn domain_job(id: &str, domain: &str) -> ScanJob {
    ScanJob::with_id(
        JobId::new(id),
        ScanTarget::Domain {
            domain: domain.to_string(),
        },
    )
}

fn stale_job(id: &str, domain: &str) -> ScanJob {
    let mut job = domain_job(id, domain);
    job.created_at = Utc::now() - chrono::Duration::hours(2);
    job
}

fn test_env() -> ModuleEnvironment {
    ModuleEnvironment::new(
        reqwest::Client::new(),
        4,
        ScanCredentials::default(),
    )
}

struct FixedCount(u64);

#[async_trait]
impl ScanModule for FixedCount {
    async fn run(&self, _ctx: &JobContext) -> vantage_core::Result<u64> {
        Ok(self.0)
    }
}

struct FailingPhase(&'static str);

#[async_trait]
impl ScanModule for FailingPhase {
    async fn run(&self, _ctx: &JobContext) -> vantage_core::Result<u64> {
        Err(ScanError::Module(self.0.to_string()))
    }
}

struct FatalPhase;

#[async_trait]
impl ScanModule for FatalPhase {
    async fn run(&self, _ctx: &JobContext) -> vantage_core::Result<u64> {
        Err(ScanError::MissingCredential("shodan_api_key".into()))
    }
}

struct RecordingPhase {
    ran: Arc<AtomicBool>,
}

#[async_trait]
impl ScanModule for RecordingPhase {
    async fn run(&self, _ctx: &JobContext) -> vantage_core::Result<u64> {
        self.ran.store(true, Ordering::SeqCst);
        Ok(1)
    }
}

/// Writes `artifacts` artifact rows and `findings` findings against the
/// first of them, returning the finding count.
struct WritingPhase {
    artifacts: usize,
    findings: usize,
}

#[async_trait]
impl ScanModule for WritingPhase {
    async fn run(&self, ctx: &JobContext) -> vantage_core::Result<u64> {
        let mut first = None;
        for i in 0..self.artifacts {
            let id = ctx
                .store
                .insert_artifact(&NewArtifact::for_job(
                    &ctx.job.id,
                    "asset",
                    format!("asset-{i}"),
                    Severity::Info,
                ))
                .await?;
            first.get_or_insert(id);
        }
        let mut findings = 0u64;
        if let Some(artifact_id) = first {
            for _ in 0..self.findings {
                ctx.store
                    .insert_finding(
                        artifact_id,
                        &NewFinding {
                            finding_type: "weak_asset".into(),
                            recommendation: "tighten it".into(),
                            description: "exercised by tests".into(),
                        },
                    )
                    .await?;
                findings += 1;
            }
        }
        Ok(findings)
    }
}

mock! {
    Store {}

    #[async_trait]
    impl ArtifactStore for Store {
        async fn insert_artifact(
            &self,
            artifact: &NewArtifact,
        ) -> vantage_core::Result<i64>;
        async fn insert_finding(
            &self,
            artifact_id: i64,
            finding: &NewFinding,
        ) -> vantage_core::Result<i64>;
        async fn artifacts_for_job(
            &self,
            job_id: &JobId,
        ) -> vantage_core::Result<Vec<ArtifactRecord>>;
    }
}

async fn wait_terminal(queue: &MemoryJobQueue, id: &JobId) -> JobStatus {
    for _ in 0..500 {
        if let Some(status) = queue.status(id).await.expect("status read")
            && status.state.is_terminal()
        {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached a terminal state");
}

#[tokio::test]
async fn submit_then_status_reports_queued() {
    let queue = Arc::new(MemoryJobQueue::new());
    let submitter = JobSubmitter::new(queue.clone());

    let job = submitter
        .submit_target(ScanTarget::Domain {
            domain: "example.com".to_string(),
        })
        .await
        .expect("submit");

    let status = submitter
        .status(&job.id)
        .await
        .expect("status read")
        .expect("status exists immediately after submit");
    assert_eq!(status.state, JobState::Queued);
}

#[tokio::test]
async fn unknown_id_is_none_not_a_state() {
    let queue = MemoryJobQueue::new();
    let status = queue
        .status(&JobId::new("never-submitted"))
        .await
        .expect("status read");
    assert!(status.is_none());
}

#[tokio::test]
async fn resubmitting_an_id_resets_status_to_queued() {
    let queue = MemoryJobQueue::new();
    let job = domain_job("abc123", "example.com");
    queue.enqueue(&job).await.expect("enqueue");

    let worker = WorkerContext::new("w1");
    queue
        .claim_next(&worker)
        .await
        .expect("claim")
        .expect("job available");
    let status = queue.status(&job.id).await.expect("read").expect("some");
    assert_eq!(status.state, JobState::Processing);

    queue.enqueue(&job).await.expect("re-enqueue");
    let status = queue.status(&job.id).await.expect("read").expect("some");
    assert_eq!(status.state, JobState::Queued);
}

#[tokio::test]
async fn concurrent_claims_never_hand_out_the_same_job() {
    let queue = MemoryJobQueue::new();
    queue
        .enqueue(&domain_job("job-a", "a.example"))
        .await
        .expect("enqueue a");
    queue
        .enqueue(&domain_job("job-b", "b.example"))
        .await
        .expect("enqueue b");

    let w1 = WorkerContext::new("w1");
    let w2 = WorkerContext::new("w2");
    let (c1, c2) =
        tokio::join!(queue.claim_next(&w1), queue.claim_next(&w2));
    let c1 = c1.expect("claim 1").expect("job for w1");
    let c2 = c2.expect("claim 2").expect("job for w2");

    assert_ne!(c1.job.id, c2.job.id, "one job went to exactly one worker");
    assert!(
        queue
            .claim_next(&WorkerContext::new("w3"))
            .await
            .expect("claim 3")
            .is_none(),
        "pending list is drained"
    );

    // Each claim sits in its owner's private list only.
    assert_eq!(queue.inflight_for("w1").await.len(), 1);
    assert_eq!(queue.inflight_for("w2").await.len(), 1);
    assert!(queue.inflight_for("w3").await.is_empty());
}

#[tokio::test]
async fn malformed_payload_is_dead_lettered_not_requeued() {
    let queue = MemoryJobQueue::new();
    queue.push_raw("{ not json at all").await;
    queue
        .enqueue(&domain_job("abc123", "example.com"))
        .await
        .expect("enqueue");

    let worker = WorkerContext::new("w1");
    let claim = queue
        .claim_next(&worker)
        .await
        .expect("claim survives the malformed entry")
        .expect("valid job comes through");
    assert_eq!(claim.job.id, JobId::new("abc123"));

    assert_eq!(queue.dead_letters().await, vec!["{ not json at all"]);
    assert_eq!(queue.pending_len().await, 0, "nothing was requeued");
}

#[tokio::test]
async fn reclaim_requeues_a_stale_claim_exactly_once() {
    let queue = MemoryJobQueue::new();
    let job = stale_job("abc123", "example.com");
    queue.enqueue(&job).await.expect("enqueue");

    let worker = WorkerContext::new("w1");
    queue
        .claim_next(&worker)
        .await
        .expect("claim")
        .expect("job available");

    let timeout = chrono::Duration::minutes(30);
    assert_eq!(
        queue.reclaim_stale(timeout).await.expect("first sweep"),
        1
    );
    // Idempotence: a back-to-back sweep finds nothing left to move.
    assert_eq!(
        queue.reclaim_stale(timeout).await.expect("second sweep"),
        0
    );
    assert_eq!(queue.pending_len().await, 1);

    let status = queue.status(&job.id).await.expect("read").expect("some");
    assert_eq!(status.state, JobState::Queued);
    assert!(
        status.message.as_deref().unwrap_or_default().contains("reclaimed")
    );

    // The job is claimable again, by any worker.
    let reclaimed = queue
        .claim_next(&WorkerContext::new("w2"))
        .await
        .expect("claim")
        .expect("reclaimed job available");
    assert_eq!(reclaimed.job.id, job.id);
}

#[tokio::test]
async fn reclaim_leaves_fresh_claims_alone() {
    let queue = MemoryJobQueue::new();
    queue
        .enqueue(&domain_job("fresh", "example.com"))
        .await
        .expect("enqueue");
    let worker = WorkerContext::new("w1");
    queue
        .claim_next(&worker)
        .await
        .expect("claim")
        .expect("job available");

    assert_eq!(
        queue
            .reclaim_stale(chrono::Duration::minutes(30))
            .await
            .expect("sweep"),
        0
    );
    assert_eq!(queue.inflight_for("w1").await.len(), 1);
}

#[tokio::test]
async fn late_ack_after_reclaim_still_lands_on_status() {
    let queue = MemoryJobQueue::new();
    let job = stale_job("abc123", "example.com");
    queue.enqueue(&job).await.expect("enqueue");

    let worker = WorkerContext::new("w1");
    let claim = queue
        .claim_next(&worker)
        .await
        .expect("claim")
        .expect("job available");
    assert_eq!(
        queue
            .reclaim_stale(chrono::Duration::minutes(30))
            .await
            .expect("sweep"),
        1
    );

    // The original worker was only slow, not dead: its ack proceeds even
    // though the in-flight entry is long gone.
    queue
        .ack(
            &worker,
            &claim,
            vantage_core::AckOutcome::Done {
                message: "scan complete: 4 finding(s)".into(),
                result_url: None,
            },
        )
        .await
        .expect("ack succeeds");

    let status = queue.status(&job.id).await.expect("read").expect("some");
    assert_eq!(status.state, JobState::Done);
    // At-least-once: the requeued duplicate is still pending and may run.
    assert_eq!(queue.pending_len().await, 1);
}

#[tokio::test]
async fn phase_failure_is_isolated_and_diagnosed() {
    let store = Arc::new(MemoryArtifactStore::new());
    let executor = PipelineExecutor::new(vec![
        PhaseDescriptor::new("subdomain_enum", Arc::new(FixedCount(2))),
        PhaseDescriptor::new("port_sweep", Arc::new(FixedCount(0))),
        PhaseDescriptor::new(
            "secret_hunt",
            Arc::new(FailingPhase("tool exploded")),
        ),
        PhaseDescriptor::new("http_probe", Arc::new(FixedCount(1))),
        PhaseDescriptor::new("tech_fingerprint", Arc::new(FixedCount(3))),
    ]);
    let ctx = test_env().context_for(
        domain_job("abc123", "example.com"),
        store.clone() as Arc<dyn ArtifactStore>,
    );

    let outcome = executor.execute(&ctx).await;
    assert_eq!(outcome.total_findings, 6);
    assert_eq!(outcome.verdict, JobVerdict::Done);
    assert!(outcome.message.contains('6'));

    let diagnostics: Vec<_> = store
        .artifacts()
        .await
        .into_iter()
        .filter(|a| a.kind == "phase_error")
        .collect();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].val_text.contains("secret_hunt"));
    assert!(diagnostics[0].val_text.contains("tool exploded"));
    assert_eq!(diagnostics[0].severity, Severity::Info);
    assert_eq!(
        diagnostics[0].meta.get("job_id").and_then(|v| v.as_str()),
        Some("abc123")
    );
}

#[tokio::test]
async fn all_zero_counts_fail_even_without_a_throw() {
    let store = Arc::new(MemoryArtifactStore::new());
    let phases = vec![
        PhaseDescriptor::new("subdomain_enum", Arc::new(FixedCount(0))),
        PhaseDescriptor::new("port_sweep", Arc::new(FixedCount(0))),
        PhaseDescriptor::new("http_probe", Arc::new(FixedCount(0))),
    ];
    let executor = PipelineExecutor::new(phases.clone());
    let ctx = test_env().context_for(
        domain_job("abc123", "example.com"),
        store.clone() as Arc<dyn ArtifactStore>,
    );

    let outcome = executor.execute(&ctx).await;
    assert_eq!(outcome.verdict, JobVerdict::Failed);
    assert_eq!(outcome.total_findings, 0);
    assert!(
        store.artifacts().await.is_empty(),
        "no phase threw, so no diagnostics were written"
    );

    // The rule lives in the injectable policy, not the control flow.
    let lenient = PipelineExecutor::with_policy(phases, empty_is_clean);
    let outcome = lenient.execute(&ctx).await;
    assert_eq!(outcome.verdict, JobVerdict::Done);
}

#[tokio::test]
async fn fatal_precondition_aborts_remaining_phases() {
    let store = Arc::new(MemoryArtifactStore::new());
    let ran_after = Arc::new(AtomicBool::new(false));
    let executor = PipelineExecutor::new(vec![
        PhaseDescriptor::new("subdomain_enum", Arc::new(FixedCount(2))),
        PhaseDescriptor::new("passive_dns", Arc::new(FatalPhase)),
        PhaseDescriptor::new(
            "http_probe",
            Arc::new(RecordingPhase {
                ran: ran_after.clone(),
            }),
        ),
    ]);
    let ctx = test_env().context_for(
        domain_job("abc123", "example.com"),
        store.clone() as Arc<dyn ArtifactStore>,
    );

    let outcome = executor.execute(&ctx).await;
    assert_eq!(outcome.verdict, JobVerdict::Failed);
    assert!(outcome.error.is_some());
    assert!(
        !ran_after.load(Ordering::SeqCst),
        "phases after the fatal one never run"
    );

    let fatal: Vec<_> = store
        .artifacts()
        .await
        .into_iter()
        .filter(|a| a.kind == "fatal_error")
        .collect();
    assert_eq!(fatal.len(), 1);
    assert!(fatal[0].val_text.contains("passive_dns"));
}

#[tokio::test]
async fn diagnostic_write_failure_does_not_kill_the_pipeline() {
    let mut store = MockStore::new();
    store.expect_insert_artifact().returning(|_| {
        Err(ScanError::Internal("findings store offline".into()))
    });
    let store: Arc<dyn ArtifactStore> = Arc::new(store);

    let executor = PipelineExecutor::new(vec![PhaseDescriptor::new(
        "port_sweep",
        Arc::new(FailingPhase("connect refused")),
    )]);
    let ctx = test_env()
        .context_for(domain_job("abc123", "example.com"), store);

    let outcome = executor.execute(&ctx).await;
    assert_eq!(outcome.verdict, JobVerdict::Failed);
    assert_eq!(outcome.total_findings, 0);
}

#[tokio::test]
async fn finding_without_artifact_is_rejected_and_writes_nothing() {
    let store = MemoryArtifactStore::new();
    let err = store
        .insert_finding(
            9999,
            &NewFinding {
                finding_type: "orphan".into(),
                recommendation: "n/a".into(),
                description: "n/a".into(),
            },
        )
        .await
        .expect_err("missing artifact must be rejected");
    assert!(matches!(err, ScanError::ReferentialIntegrity(9999)));
    assert!(store.findings().await.is_empty());
}

#[tokio::test]
async fn worker_loop_runs_a_job_to_done_with_finding_count() {
    let queue = Arc::new(MemoryJobQueue::new());
    let store = Arc::new(MemoryArtifactStore::new());
    let shutdown = CancellationToken::new();

    // Module A writes 2 artifacts + 1 finding, module B finds nothing,
    // module C throws. Aggregate count 1 ⇒ done.
    let executor = Arc::new(PipelineExecutor::new(vec![
        PhaseDescriptor::new(
            "subdomain_enum",
            Arc::new(WritingPhase {
                artifacts: 2,
                findings: 1,
            }),
        ),
        PhaseDescriptor::new("port_sweep", Arc::new(FixedCount(0))),
        PhaseDescriptor::new(
            "http_probe",
            Arc::new(FailingPhase("probe timed out")),
        ),
    ]));

    let worker_loop = WorkerLoop::new(
        queue.clone(),
        store.clone(),
        executor,
        test_env(),
        WorkerContext::new("w1"),
        WorkerTuning {
            idle_delay: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
        },
        shutdown.clone(),
    );
    let handle = tokio::spawn(async move { worker_loop.run().await });

    let job = domain_job("abc123", "example.com");
    queue.enqueue(&job).await.expect("enqueue");

    let status = wait_terminal(&queue, &job.id).await;
    assert_eq!(status.state, JobState::Done);
    assert!(
        status.message.as_deref().unwrap_or_default().contains('1'),
        "message summarizes the finding count: {:?}",
        status.message
    );

    // 2 asset artifacts plus 1 diagnostic from the throwing phase.
    assert_eq!(store.artifacts().await.len(), 3);
    assert_eq!(store.findings().await.len(), 1);
    assert!(queue.inflight_for("w1").await.is_empty(), "job was acked");

    shutdown.cancel();
    handle.await.expect("worker task joins");
}

#[tokio::test]
async fn worker_loop_marks_empty_scans_failed() {
    let queue = Arc::new(MemoryJobQueue::new());
    let store = Arc::new(MemoryArtifactStore::new());
    let shutdown = CancellationToken::new();

    let executor = Arc::new(PipelineExecutor::new(vec![
        PhaseDescriptor::new("subdomain_enum", Arc::new(FixedCount(0))),
        PhaseDescriptor::new("port_sweep", Arc::new(FixedCount(0))),
    ]));
    let worker_loop = WorkerLoop::new(
        queue.clone(),
        store,
        executor,
        test_env(),
        WorkerContext::new("w1"),
        WorkerTuning {
            idle_delay: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
        },
        shutdown.clone(),
    );
    let handle = tokio::spawn(async move { worker_loop.run().await });

    let job = domain_job("quiet-target", "example.com");
    queue.enqueue(&job).await.expect("enqueue");

    let status = wait_terminal(&queue, &job.id).await;
    assert_eq!(
        status.state,
        JobState::Failed,
        "zero findings is a tooling failure, not a clean pass"
    );

    shutdown.cancel();
    handle.await.expect("worker task joins");
}
