use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::JobId;

/// What a job points its scan modules at.
///
/// Stored as a tagged union so queue payloads are validated at the store
/// boundary; an unknown tag or missing field is a parse error, not a
/// half-populated record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanTarget {
    /// A bare apex domain, e.g. `example.com`.
    Domain { domain: String },
    /// A company with an optional primary domain to seed discovery.
    Company {
        name: String,
        primary_domain: Option<String>,
    },
}

impl ScanTarget {
    /// The domain modules should probe, when one is known.
    pub fn domain(&self) -> Option<&str> {
        match self {
            ScanTarget::Domain { domain } => Some(domain),
            ScanTarget::Company { primary_domain, .. } => {
                primary_domain.as_deref()
            }
        }
    }

    /// Short human label used in log lines and status messages.
    pub fn label(&self) -> &str {
        match self {
            ScanTarget::Domain { domain } => domain,
            ScanTarget::Company { name, .. } => name,
        }
    }
}

/// One submitted scan request. Immutable once enqueued.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub target: ScanTarget,
    pub created_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn new(target: ScanTarget) -> Self {
        Self {
            id: JobId::generate(),
            target,
            created_at: Utc::now(),
        }
    }

    /// Build a job with a caller-supplied id, e.g. one minted by an API
    /// frontend before submission.
    pub fn with_id(id: JobId, target: ScanTarget) -> Self {
        Self {
            id,
            target,
            created_at: Utc::now(),
        }
    }
}
