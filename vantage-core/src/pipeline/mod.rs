//! Phase descriptors, the pipeline executor, and the terminal policy.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, warn};

use vantage_model::{NewArtifact, Severity};

use crate::error::{Result, ScanError};

pub mod context;

pub use context::{JobContext, ModuleEnvironment, ScanCredentials};

/// One pluggable unit of scanning work.
///
/// A module performs all of its own artifact/finding writes through the
/// context and returns the count of actionable results it persisted. Zero
/// is a normal, successful return; modules never throw just because a
/// target was quiet.
#[async_trait]
pub trait ScanModule: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> Result<u64>;
}

/// A named pipeline phase. The executor runs descriptors strictly in list
/// order, because later phases consume target lists (subdomains, hosts,
/// endpoints) that earlier phases wrote to the findings store.
#[derive(Clone)]
pub struct PhaseDescriptor {
    pub name: &'static str,
    pub module: Arc<dyn ScanModule>,
}

impl PhaseDescriptor {
    pub fn new(name: &'static str, module: Arc<dyn ScanModule>) -> Self {
        Self { name, module }
    }
}

impl fmt::Debug for PhaseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Terminal classification of a finished pipeline run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobVerdict {
    Done,
    Failed,
}

/// Maps the aggregate finding count to a verdict once every phase has run.
pub type TerminalPolicy = fn(u64) -> JobVerdict;

/// Default terminal policy: a full multi-phase scan that produced nothing
/// is treated as a tooling failure, not a clean target. A genuinely empty
/// attack surface is statistically unlikely; a silent scanner malfunction
/// is not.
pub fn zero_findings_fail(total: u64) -> JobVerdict {
    if total == 0 {
        JobVerdict::Failed
    } else {
        JobVerdict::Done
    }
}

/// What the worker loop acks after a pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineOutcome {
    pub verdict: JobVerdict,
    pub total_findings: u64,
    pub message: String,
    pub error: Option<String>,
}

/// Runs the ordered phase list against one claimed job.
///
/// Each phase is isolated: a failing module contributes zero to the total,
/// leaves one informational diagnostic artifact behind, and the pipeline
/// moves on. The one exception is a fatal precondition (a mandatory
/// credential missing for the whole job), which aborts the remaining
/// phases outright.
pub struct PipelineExecutor {
    phases: Vec<PhaseDescriptor>,
    policy: TerminalPolicy,
}

impl fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field(
                "phases",
                &self.phases.iter().map(|p| p.name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    pub fn new(phases: Vec<PhaseDescriptor>) -> Self {
        Self {
            phases,
            policy: zero_findings_fail,
        }
    }

    pub fn with_policy(
        phases: Vec<PhaseDescriptor>,
        policy: TerminalPolicy,
    ) -> Self {
        Self { phases, policy }
    }

    /// Declared phase order, for inspection and logging.
    pub fn phase_names(&self) -> Vec<&'static str> {
        self.phases.iter().map(|p| p.name).collect()
    }

    pub async fn execute(&self, ctx: &JobContext) -> PipelineOutcome {
        let mut total: u64 = 0;

        for phase in &self.phases {
            debug!(job = %ctx.job.id, phase = phase.name, "running phase");
            match phase.module.run(ctx).await {
                Ok(count) => {
                    debug!(
                        job = %ctx.job.id,
                        phase = phase.name,
                        count,
                        "phase finished"
                    );
                    total += count;
                }
                Err(err) if err.is_fatal_precondition() => {
                    error!(
                        job = %ctx.job.id,
                        phase = phase.name,
                        %err,
                        "fatal precondition; aborting remaining phases"
                    );
                    self.record_diagnostic(ctx, phase.name, &err, true)
                        .await;
                    return PipelineOutcome {
                        verdict: JobVerdict::Failed,
                        total_findings: total,
                        message: format!(
                            "scan aborted in phase {}: {}",
                            phase.name, err
                        ),
                        error: Some(err.to_string()),
                    };
                }
                Err(err) => {
                    warn!(
                        job = %ctx.job.id,
                        phase = phase.name,
                        %err,
                        "phase failed; continuing"
                    );
                    self.record_diagnostic(ctx, phase.name, &err, false)
                        .await;
                }
            }
        }

        let verdict = (self.policy)(total);
        let message = match verdict {
            JobVerdict::Done => {
                format!("scan complete: {total} finding(s)")
            }
            JobVerdict::Failed if total == 0 => format!(
                "no findings across {} phase(s); treating empty result as \
                 tooling failure",
                self.phases.len()
            ),
            JobVerdict::Failed => {
                format!("terminal policy rejected {total} finding(s)")
            }
        };
        PipelineOutcome {
            verdict,
            total_findings: total,
            message,
            error: None,
        }
    }

    async fn record_diagnostic(
        &self,
        ctx: &JobContext,
        phase: &str,
        err: &ScanError,
        fatal: bool,
    ) {
        let (kind, severity) = if fatal {
            ("fatal_error", Severity::High)
        } else {
            ("phase_error", Severity::Info)
        };
        let artifact = NewArtifact::for_job(
            &ctx.job.id,
            kind,
            format!("{phase}: {err}"),
            severity,
        )
        .with_meta("phase", json!(phase));

        // Diagnostics are best-effort; a store hiccup here must not take
        // down the pipeline that is busy surviving a module failure.
        if let Err(store_err) = ctx.store.insert_artifact(&artifact).await {
            warn!(
                job = %ctx.job.id,
                phase,
                %store_err,
                "failed to record diagnostic artifact"
            );
        }
    }
}

/// Convenience used by tests and alternate deployments where an empty scan
/// should read as a clean pass.
pub fn empty_is_clean(_total: u64) -> JobVerdict {
    JobVerdict::Done
}
