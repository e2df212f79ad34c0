use std::time::Duration;

use thiserror::Error;

use crate::session::SessionError;
use crate::state_machine::ProtocolStep;

/// Service-level errors surfaced to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("No valid MC numbers found")]
    EmptyBatch,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("File not found: {0}")]
    ArtifactNotFound(String),

    #[error("Artifact I/O error: {0}")]
    ArtifactIo(#[from] std::io::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Session pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Job execution aborted: {0}")]
    Aborted(String),
}

/// Errors raised while checking a session out of the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no session available after {}ms", waited.as_millis())]
    Exhausted { waited: Duration },

    #[error("session pool is closed")]
    Closed,

    #[error("failed to open session: {0}")]
    Open(#[from] SessionError),
}

/// Why a single protocol step could not complete.
///
/// Every variant degrades the current key to a transient failure; none of
/// them aborts the batch.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{step} did not settle within {}ms", after.as_millis())]
    NavigationTimeout { step: ProtocolStep, after: Duration },

    #[error("{step}: element `{element}` not available within {}ms", after.as_millis())]
    ElementTimeout {
        step: ProtocolStep,
        element: String,
        after: Duration,
    },

    #[error("no session available after {}ms", waited.as_millis())]
    PoolExhausted { waited: Duration },

    #[error("{step} failed: {source}")]
    Session {
        step: ProtocolStep,
        #[source]
        source: SessionError,
    },
}
