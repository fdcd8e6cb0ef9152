//! # Vantage Worker
//!
//! Scan worker daemon: claims jobs from the shared queue, runs the phase
//! pipeline against each target, and writes artifacts/findings into the
//! store. Run one process per worker slot; each gets its own owner id and
//! the queue's atomic handoff keeps them from stepping on each other.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vantage_config::{WorkerConfig, WorkerConfigSource};
use vantage_core::modules::{
    CrtShSubdomainsModule, HttpProbeModule, PortSweepModule,
    ShodanDnsModule,
};
use vantage_core::worker::WorkerTuning;
use vantage_core::{
    ArtifactStore, JobQueue, ModuleEnvironment, PhaseDescriptor,
    PipelineExecutor, PostgresArtifactStore, RedisJobQueue,
    ScanCredentials, StaleJobReclaimer, WorkerContext, WorkerLoop,
};

fn build_phases(
    config: &WorkerConfig,
    http_timeout: Duration,
) -> Vec<PhaseDescriptor> {
    let mut phases = vec![
        PhaseDescriptor::new(
            "subdomain_enum",
            Arc::new(CrtShSubdomainsModule::new(http_timeout, 200)),
        ),
        PhaseDescriptor::new(
            "port_sweep",
            Arc::new(PortSweepModule::new(
                Duration::from_secs(3),
                32,
            )),
        ),
        PhaseDescriptor::new(
            "http_probe",
            Arc::new(HttpProbeModule::new(http_timeout)),
        ),
    ];
    // The Shodan phase hard-requires its key; only wire it when one is
    // configured so default deployments do not fail every job.
    if config.credentials.shodan_api_key.is_some() {
        phases.push(PhaseDescriptor::new(
            "passive_dns",
            Arc::new(ShodanDnsModule::new(http_timeout)),
        ));
    }
    phases
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, source) = WorkerConfig::load_from_env()
        .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &source {
        WorkerConfigSource::Default => {
            info!("using default configuration")
        }
        WorkerConfigSource::EnvPath(path) => {
            info!(path = %path.display(), "configuration loaded from env path")
        }
        WorkerConfigSource::EnvInline => {
            info!("configuration loaded from inline environment json")
        }
        WorkerConfigSource::File(path) => {
            info!(path = %path.display(), "configuration loaded from file")
        }
    }

    let queue: Arc<dyn JobQueue> = Arc::new(
        RedisJobQueue::connect(&config.redis_url)
            .await
            .context("failed to connect to the queue store")?,
    );

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    let store: Arc<dyn ArtifactStore> = Arc::new(
        PostgresArtifactStore::new(pool)
            .await
            .context("findings store validation failed")?,
    );

    let http_timeout =
        Duration::from_secs(config.worker.http_timeout_secs);
    let http = reqwest::Client::builder()
        .timeout(http_timeout)
        .user_agent(concat!("vantage/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let credentials = ScanCredentials {
        shodan_api_key: config.credentials.shodan_api_key.clone(),
    };
    let env = ModuleEnvironment::new(
        http,
        config.worker.module_concurrency,
        credentials,
    );
    let executor = Arc::new(PipelineExecutor::new(build_phases(
        &config,
        http_timeout,
    )));

    let shutdown = CancellationToken::new();
    let reclaimer = StaleJobReclaimer::new(
        Arc::clone(&queue),
        chrono::Duration::seconds(config.reclaim.stale_after_secs),
        Duration::from_secs(config.reclaim.sweep_interval_secs),
        shutdown.clone(),
    );
    let reclaim_handle = tokio::spawn(async move {
        reclaimer.run().await;
    });

    let worker = WorkerContext::for_process("scan");
    let tuning = WorkerTuning {
        idle_delay: Duration::from_millis(config.worker.idle_delay_ms),
        error_backoff: Duration::from_millis(
            config.worker.error_backoff_ms,
        ),
    };
    let worker_loop = WorkerLoop::new(
        queue,
        store,
        executor,
        env,
        worker,
        tuning,
        shutdown.clone(),
    );

    let loop_handle = tokio::spawn(async move {
        worker_loop.run().await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    shutdown.cancel();

    if let Err(err) = loop_handle.await {
        warn!(%err, "worker loop task panicked");
    }
    if let Err(err) = reclaim_handle.await {
        warn!(%err, "reclaimer task panicked");
    }
    info!("worker stopped");
    Ok(())
}
