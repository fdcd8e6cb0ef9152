use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use vantage_model::{NewArtifact, Severity};

use crate::error::{Result, ScanError};
use crate::pipeline::{JobContext, ScanModule};

#[derive(Debug, Deserialize)]
struct DnsRecord {
    subdomain: String,
    #[serde(rename = "type")]
    record_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct DnsResponse {
    #[serde(default)]
    data: Vec<DnsRecord>,
}

/// Pulls passive DNS records for the target domain from Shodan.
///
/// The API key is mandatory for the whole job type: its absence is a fatal
/// precondition, not a phase-local failure, so the executor aborts the run
/// instead of quietly producing a thinner report.
#[derive(Clone, Debug)]
pub struct ShodanDnsModule {
    request_timeout: Duration,
}

impl ShodanDnsModule {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl ScanModule for ShodanDnsModule {
    async fn run(&self, ctx: &JobContext) -> Result<u64> {
        let key =
            ctx.credentials.shodan_api_key.as_deref().ok_or_else(|| {
                ScanError::MissingCredential("shodan_api_key".into())
            })?;
        let domain = ctx.job.target.domain().ok_or_else(|| {
            ScanError::Module("target carries no domain to look up".into())
        })?;

        let endpoint = format!("https://api.shodan.io/dns/domain/{domain}");
        let resp = ctx
            .http
            .get(format!("{endpoint}?key={key}"))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                ScanError::Module(format!("shodan query failed: {e}"))
            })?;
        if !resp.status().is_success() {
            return Err(ScanError::Module(format!(
                "shodan returned HTTP {}",
                resp.status().as_u16()
            )));
        }
        let parsed: DnsResponse = resp.json().await.map_err(|e| {
            ScanError::Module(format!(
                "shodan returned unparseable JSON: {e}"
            ))
        })?;

        let mut count = 0u64;
        for record in parsed.data {
            if !matches!(record.record_type.as_str(), "A" | "AAAA" | "CNAME")
            {
                continue;
            }
            let host = if record.subdomain.is_empty() {
                domain.to_string()
            } else {
                format!("{}.{domain}", record.subdomain)
            };
            let artifact = NewArtifact::for_job(
                &ctx.job.id,
                "dns_record",
                format!("{host} {} {}", record.record_type, record.value),
                Severity::Info,
            )
            // Key deliberately left out of the recorded source url.
            .with_src_url(endpoint.clone())
            .with_meta("record_type", json!(record.record_type));
            ctx.store.insert_artifact(&artifact).await?;
            count += 1;
        }
        Ok(count)
    }
}
