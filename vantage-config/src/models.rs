use std::{env, fs, path::PathBuf};

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

/// Source that produced the worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorkerConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Top-level worker daemon settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Queue store connection string.
    pub redis_url: String,
    /// Findings store connection string.
    pub database_url: String,
    /// Claim-loop pacing and module fan-out limits.
    pub worker: WorkerTuningConfig,
    /// Stale-claim recovery tuning.
    pub reclaim: ReclaimConfig,
    /// External service credentials consumed by scan modules.
    pub credentials: CredentialsConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            database_url: "postgres://vantage@localhost/vantage"
                .to_string(),
            worker: WorkerTuningConfig::default(),
            reclaim: ReclaimConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

/// Claim-loop pacing and per-module limits.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerTuningConfig {
    /// Pause (ms) when the pending list is empty.
    pub idle_delay_ms: u64,
    /// Pause (ms) after a transient queue-store error before retrying.
    pub error_backoff_ms: u64,
    /// Cap on simultaneous outbound calls a module may keep in flight.
    pub module_concurrency: usize,
    /// Per-request timeout (secs) for module HTTP calls. Every external
    /// call a module makes must carry a timeout; this is the default one.
    pub http_timeout_secs: u64,
}

impl Default for WorkerTuningConfig {
    fn default() -> Self {
        Self {
            idle_delay_ms: 500,
            error_backoff_ms: 5_000,
            module_concurrency: 16,
            http_timeout_secs: 20,
        }
    }
}

/// Stale-claim recovery tuning.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct ReclaimConfig {
    /// Age (secs) past which a claimed job counts as abandoned. Keep well
    /// above the longest legitimate scan; a merely-slow worker that gets
    /// reclaimed produces duplicate work.
    pub stale_after_secs: i64,
    /// Sweep cadence (secs).
    pub sweep_interval_secs: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}

/// Credentials for external services. Modules that require one treat its
/// absence as a fatal precondition for the whole job.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub shodan_api_key: Option<String>,
}

impl WorkerConfig {
    /// Load worker configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$VANTAGE_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$VANTAGE_CONFIG_JSON` (inline JSON),
    /// 3) defaults if neither is set.
    pub fn load_from_env() -> anyhow::Result<(Self, WorkerConfigSource)> {
        if let Ok(path_str) = env::var("VANTAGE_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_path(&path)?;
            return Ok((config, WorkerConfigSource::EnvPath(path)));
        }

        if let Ok(inline) = env::var("VANTAGE_CONFIG_JSON")
            && !inline.trim().is_empty()
        {
            let config = serde_json::from_str(&inline)
                .context("parsing $VANTAGE_CONFIG_JSON")?;
            return Ok((config, WorkerConfigSource::EnvInline));
        }

        Ok((Self::default(), WorkerConfigSource::Default))
    }

    /// Load a TOML or JSON config file, picking the parser by extension
    /// (unknown extensions try TOML first, then JSON).
    pub fn load_from_path(path: &PathBuf) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display())),
            Some("toml") => toml::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display())),
            _ => toml::from_str(&raw)
                .or_else(|_| serde_json::from_str(&raw))
                .map_err(|_| {
                    anyhow!(
                        "{} is neither valid TOML nor valid JSON",
                        path.display()
                    )
                }),
        }
    }
}
