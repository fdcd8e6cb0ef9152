use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use vantage_model::{NewArtifact, NewFinding, Severity};

use crate::error::{Result, ScanError};
use crate::pipeline::{JobContext, ScanModule};

/// Probes the target over HTTPS (falling back to HTTP) and fingerprints
/// whatever answers: status line, server banner, framework headers.
#[derive(Clone, Debug)]
pub struct HttpProbeModule {
    request_timeout: Duration,
}

impl HttpProbeModule {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

fn header_value(
    headers: &header::HeaderMap,
    name: header::HeaderName,
) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl ScanModule for HttpProbeModule {
    async fn run(&self, ctx: &JobContext) -> Result<u64> {
        let domain = ctx.job.target.domain().ok_or_else(|| {
            ScanError::Module("target carries no domain to probe".into())
        })?;

        let mut last_err: Option<reqwest::Error> = None;
        for scheme in ["https", "http"] {
            let url = format!("{scheme}://{domain}/");
            let resp = match ctx
                .http
                .get(&url)
                .timeout(self.request_timeout)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    debug!(%url, %err, "probe attempt failed");
                    last_err = Some(err);
                    continue;
                }
            };

            let status = resp.status();
            let headers = resp.headers().clone();
            let server = header_value(&headers, header::SERVER);
            let powered_by = headers
                .get("x-powered-by")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let mime = header_value(&headers, header::CONTENT_TYPE);
            let body = resp.text().await.unwrap_or_default();
            let digest = format!("{:x}", Sha256::digest(body.as_bytes()));

            let mut artifact = NewArtifact::for_job(
                &ctx.job.id,
                "http_probe",
                format!(
                    "{domain} answered HTTP {} over {scheme}",
                    status.as_u16()
                ),
                Severity::Info,
            )
            .with_src_url(url.clone())
            .with_sha256(digest)
            .with_meta("scheme", json!(scheme))
            .with_meta("status", json!(status.as_u16()));
            if let Some(mime) = mime {
                artifact = artifact.with_mime(mime);
            }
            if let Some(server) = &server {
                artifact = artifact.with_meta("server", json!(server));
            }
            if let Some(powered_by) = &powered_by {
                artifact =
                    artifact.with_meta("powered_by", json!(powered_by));
            }
            let artifact_id = ctx.store.insert_artifact(&artifact).await?;

            let mut findings = 0u64;
            if let Some(server) = server {
                ctx.store
                    .insert_finding(
                        artifact_id,
                        &NewFinding {
                            finding_type: "exposed_server_banner".into(),
                            recommendation:
                                "Strip or genericize the Server header so \
                                 attackers cannot target known version bugs"
                                    .into(),
                            description: format!(
                                "{url} advertises `{server}`"
                            ),
                        },
                    )
                    .await?;
                findings += 1;
            }
            if let Some(powered_by) = powered_by {
                ctx.store
                    .insert_finding(
                        artifact_id,
                        &NewFinding {
                            finding_type: "exposed_framework_header".into(),
                            recommendation:
                                "Disable the X-Powered-By header in the \
                                 application server configuration"
                                    .into(),
                            description: format!(
                                "{url} advertises `{powered_by}`"
                            ),
                        },
                    )
                    .await?;
                findings += 1;
            }
            return Ok(findings);
        }

        Err(ScanError::Module(match last_err {
            Some(err) => format!("no HTTP response from {domain}: {err}"),
            None => format!("no HTTP response from {domain}"),
        }))
    }
}
