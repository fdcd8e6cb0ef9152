use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ids::JobId;

/// Severity bands attached to artifacts, matching the triage scale used by
/// downstream report consumers.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// An artifact row waiting to be inserted.
///
/// `meta` is an opaque key/value bag, but it must carry the owning job id
/// under `"job_id"`; downstream readers filter on it. Use [`NewArtifact::
/// for_job`] so the invariant holds by construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewArtifact {
    pub kind: String,
    pub val_text: String,
    pub severity: Severity,
    pub src_url: Option<String>,
    pub sha256: Option<String>,
    pub mime: Option<String>,
    pub meta: Value,
}

impl NewArtifact {
    pub fn for_job(
        job_id: &JobId,
        kind: impl Into<String>,
        val_text: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            kind: kind.into(),
            val_text: val_text.into(),
            severity,
            src_url: None,
            sha256: None,
            mime: None,
            meta: json!({ "job_id": job_id.as_str() }),
        }
    }

    pub fn with_src_url(mut self, src_url: impl Into<String>) -> Self {
        self.src_url = Some(src_url.into());
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Attach an extra key to the meta bag, preserving `job_id`.
    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.meta {
            map.insert(key.to_string(), value);
        }
        self
    }

    /// The owning job id recorded in the meta bag, if present.
    pub fn job_id(&self) -> Option<&str> {
        self.meta.get("job_id").and_then(Value::as_str)
    }
}

/// A persisted artifact row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: i64,
    pub kind: String,
    pub val_text: String,
    pub severity: Severity,
    pub src_url: Option<String>,
    pub sha256: Option<String>,
    pub mime: Option<String>,
    pub meta: Value,
    pub created_at: DateTime<Utc>,
}

/// A finding waiting to be inserted. Always attached to an existing
/// artifact row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewFinding {
    pub finding_type: String,
    pub recommendation: String,
    pub description: String,
}

/// A persisted finding row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindingRecord {
    pub id: i64,
    pub artifact_id: i64,
    pub finding_type: String,
    pub recommendation: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_round_trips_through_strings() {
        for severity in [
            Severity::Info,
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(severity.as_str().parse::<Severity>(), Ok(severity));
        }
        assert!("WHATEVER".parse::<Severity>().is_err());
    }

    #[test]
    fn for_job_always_carries_the_job_id() {
        let job_id = JobId::new("abc123");
        let artifact = NewArtifact::for_job(
            &job_id,
            "open_port",
            "example.com:22",
            Severity::Low,
        )
        .with_meta("port", json!(22));

        assert_eq!(artifact.job_id(), Some("abc123"));
        assert_eq!(artifact.meta["port"], json!(22));
    }

    #[test]
    fn with_meta_cannot_shadow_later_reads_of_job_id() {
        let job_id = JobId::new("abc123");
        let artifact = NewArtifact::for_job(
            &job_id,
            "subdomain",
            "dev.example.com",
            Severity::Info,
        );
        assert_eq!(
            artifact.meta.get("job_id").and_then(|v| v.as_str()),
            Some("abc123")
        );
    }
}
