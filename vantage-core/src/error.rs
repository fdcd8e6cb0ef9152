use thiserror::Error;

/// Error taxonomy for the orchestration engine.
///
/// The worker loop cares about three classes: transient store errors
/// ([`ScanError::Queue`], [`ScanError::Database`]) which it retries after a
/// delay, fatal preconditions ([`ScanError::MissingCredential`]) which abort
/// a whole job, and everything else, which the pipeline executor degrades to
/// a single skipped phase.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue store error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Malformed queue payload: {0}")]
    MalformedPayload(String),

    #[error("Finding references unknown artifact id {0}")]
    ReferentialIntegrity(i64),

    #[error("Missing mandatory credential: {0}")]
    MissingCredential(String),

    #[error("Module error: {0}")]
    Module(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Fatal preconditions abort every remaining phase of a job instead of
    /// being isolated to the phase that raised them.
    pub fn is_fatal_precondition(&self) -> bool {
        matches!(self, ScanError::MissingCredential(_))
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
