//! Durable, transactional store for jobs, steps, checkpoints, logs, events,
//! and stored results.
//!
//! Persistence models (serde shapes decoupled from in-memory types) live in
//! [`models`]; the service itself in [`service`]. Pure data transformation
//! stays out of the service so the database code remains lean I/O.

pub mod models;
pub mod service;

pub use models::{
    CheckpointRow, EventRow, ExecutionOptions, JobMetrics, JobRow, LogRow, PersistedContext,
    RestoredCheckpoint, ResultRow, StepMetrics, StepRow,
};
pub use service::{
    CleanupReport, JobFilter, JobStatusUpdate, NewJob, PersistenceService, DEFAULT_COMPRESS_THRESHOLD,
    DEFAULT_MAX_INLINE,
};

use miette::Diagnostic;
use thiserror::Error;

use crate::storage::StorageError;
use crate::types::JobStatus;

#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    #[diagnostic(
        code(ontoflow::persistence::sqlx),
        help("Ensure the SQLite database URL is valid and accessible.")
    )]
    Sqlx(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    #[diagnostic(
        code(ontoflow::persistence::serde),
        help("Check that persisted shapes match the Persisted* models.")
    )]
    Serde(#[from] serde_json::Error),

    #[error("job not found: {job_id}")]
    #[diagnostic(code(ontoflow::persistence::job_not_found))]
    JobNotFound { job_id: String },

    #[error("step {step_index} not found for job {job_id}")]
    #[diagnostic(code(ontoflow::persistence::step_not_found))]
    StepNotFound { job_id: String, step_index: u32 },

    #[error("checkpoint not found: {checkpoint_id}")]
    #[diagnostic(code(ontoflow::persistence::checkpoint_not_found))]
    CheckpointNotFound { checkpoint_id: String },

    #[error("checkpoint {checkpoint_id} is not resumable")]
    #[diagnostic(
        code(ontoflow::persistence::not_resumable),
        help("Pick an earlier resumable checkpoint via list_checkpoints.")
    )]
    NotResumable { checkpoint_id: String },

    #[error("illegal job status transition: {from} -> {to}")]
    #[diagnostic(
        code(ontoflow::persistence::illegal_transition),
        help("Job status transitions must follow the engine state machine.")
    )]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("corrupt persisted field: {0}")]
    #[diagnostic(code(ontoflow::persistence::corrupt))]
    Corrupt(&'static str),

    #[error("compression error: {0}")]
    #[diagnostic(code(ontoflow::persistence::compression))]
    Compression(String),

    #[error("migration failure: {0}")]
    #[diagnostic(
        code(ontoflow::persistence::migration),
        help("Check the embedded migrations against the existing schema.")
    )]
    Migration(String),

    #[error(transparent)]
    #[diagnostic(code(ontoflow::persistence::storage))]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Compress with zlib deflate. Applied above the configured threshold; the
/// codec is pinned so restores are byte-identical across versions.
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::{write::ZlibEncoder, Compression};
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| PersistenceError::Compression(e.to_string()))
}

pub(crate) fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PersistenceError::Compression(e.to_string()))?;
    Ok(out)
}
