use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::net::TcpStream;
use tracing::debug;

use vantage_model::{NewArtifact, NewFinding, Severity};

use crate::error::{Result, ScanError};
use crate::pipeline::{JobContext, ScanModule};

/// The short service list worth a connect check on every scan.
pub const DEFAULT_PORTS: &[u16] = &[
    21, 22, 23, 25, 80, 110, 143, 443, 445, 3306, 3389, 5432, 6379, 8080,
    8443,
];

fn severity_for_port(port: u16) -> Severity {
    match port {
        80 | 443 | 8080 | 8443 => Severity::Info,
        22 => Severity::Low,
        21 | 23 | 25 | 110 | 143 => Severity::Medium,
        445 | 3306 | 3389 | 5432 | 6379 => Severity::High,
        _ => Severity::Low,
    }
}

/// TCP connect sweep over a fixed port list.
///
/// Sweeps the apex plus any `subdomain` artifacts earlier phases wrote for
/// this job; connect attempts run concurrently under the shared limiter,
/// each with its own timeout.
#[derive(Clone, Debug)]
pub struct PortSweepModule {
    connect_timeout: Duration,
    ports: Vec<u16>,
    max_hosts: usize,
}

impl PortSweepModule {
    pub fn new(connect_timeout: Duration, max_hosts: usize) -> Self {
        Self {
            connect_timeout,
            ports: DEFAULT_PORTS.to_vec(),
            max_hosts,
        }
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }
}

#[async_trait]
impl ScanModule for PortSweepModule {
    async fn run(&self, ctx: &JobContext) -> Result<u64> {
        let mut hosts = Vec::new();
        if let Some(domain) = ctx.job.target.domain() {
            hosts.push(domain.to_string());
        }
        for artifact in ctx.store.artifacts_for_job(&ctx.job.id).await? {
            if artifact.kind == "subdomain" {
                hosts.push(artifact.val_text);
            }
        }
        hosts.dedup();
        hosts.truncate(self.max_hosts);
        if hosts.is_empty() {
            return Err(ScanError::Module(
                "no hosts available to sweep".into(),
            ));
        }

        let checks: Vec<(String, u16)> = hosts
            .iter()
            .flat_map(|host| {
                self.ports.iter().map(move |port| (host.clone(), *port))
            })
            .collect();
        debug!(
            job = %ctx.job.id,
            hosts = hosts.len(),
            checks = checks.len(),
            "starting port sweep"
        );

        let open = futures::future::join_all(checks.into_iter().map(
            |(host, port)| {
                let limiter = Arc::clone(&ctx.limiter);
                let connect_timeout = self.connect_timeout;
                async move {
                    let Ok(_permit) = limiter.acquire().await else {
                        return None;
                    };
                    match tokio::time::timeout(
                        connect_timeout,
                        TcpStream::connect((host.as_str(), port)),
                    )
                    .await
                    {
                        Ok(Ok(_stream)) => Some((host, port)),
                        _ => None,
                    }
                }
            },
        ))
        .await;

        let mut count = 0u64;
        for (host, port) in open.into_iter().flatten() {
            let severity = severity_for_port(port);
            let artifact = NewArtifact::for_job(
                &ctx.job.id,
                "open_port",
                format!("{host}:{port}"),
                severity,
            )
            .with_meta("port", json!(port));
            let artifact_id = ctx.store.insert_artifact(&artifact).await?;

            if severity > Severity::Info {
                ctx.store
                    .insert_finding(
                        artifact_id,
                        &NewFinding {
                            finding_type: "exposed_service".into(),
                            recommendation: format!(
                                "Restrict public access to port {port} or \
                                 move the service behind a VPN"
                            ),
                            description: format!(
                                "{host} accepts TCP connections on port \
                                 {port}"
                            ),
                        },
                    )
                    .await?;
            }
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_ports_rank_high() {
        assert_eq!(severity_for_port(5432), Severity::High);
        assert_eq!(severity_for_port(6379), Severity::High);
        assert_eq!(severity_for_port(443), Severity::Info);
        assert_eq!(severity_for_port(22), Severity::Low);
    }
}
