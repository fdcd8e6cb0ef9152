use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use vantage_model::{NewArtifact, Severity};

use crate::error::{Result, ScanError};
use crate::pipeline::{JobContext, ScanModule};

#[derive(Debug, Deserialize)]
struct CrtShEntry {
    name_value: String,
}

/// Enumerates subdomains from certificate-transparency logs via crt.sh.
///
/// Discovered names are written as `subdomain` artifacts; downstream
/// phases (port sweep, HTTP probe) pick them up as additional hosts.
#[derive(Clone, Debug)]
pub struct CrtShSubdomainsModule {
    request_timeout: Duration,
    max_results: usize,
}

impl CrtShSubdomainsModule {
    pub fn new(request_timeout: Duration, max_results: usize) -> Self {
        Self {
            request_timeout,
            max_results,
        }
    }
}

#[async_trait]
impl ScanModule for CrtShSubdomainsModule {
    async fn run(&self, ctx: &JobContext) -> Result<u64> {
        let domain = ctx.job.target.domain().ok_or_else(|| {
            ScanError::Module(
                "target carries no domain to enumerate".into(),
            )
        })?;

        let url = format!("https://crt.sh/?q=%25.{domain}&output=json");
        let resp = ctx
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                ScanError::Module(format!("crt.sh query failed: {e}"))
            })?;
        let entries: Vec<CrtShEntry> = resp.json().await.map_err(|e| {
            ScanError::Module(format!(
                "crt.sh returned unparseable JSON: {e}"
            ))
        })?;

        let suffix = format!(".{domain}");
        let mut names = BTreeSet::new();
        for entry in entries {
            for name in entry.name_value.lines() {
                let name = name
                    .trim()
                    .trim_start_matches("*.")
                    .to_ascii_lowercase();
                if name.ends_with(&suffix) {
                    names.insert(name);
                }
            }
        }
        debug!(
            job = %ctx.job.id,
            domain,
            discovered = names.len(),
            "crt.sh enumeration finished"
        );

        let mut count = 0u64;
        for name in names.into_iter().take(self.max_results) {
            let artifact = NewArtifact::for_job(
                &ctx.job.id,
                "subdomain",
                name,
                Severity::Info,
            )
            .with_src_url("https://crt.sh/")
            .with_meta("source", json!("certificate-transparency"));
            ctx.store.insert_artifact(&artifact).await?;
            count += 1;
        }
        Ok(count)
    }
}
