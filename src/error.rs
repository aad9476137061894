//! Top-level error taxonomy.
//!
//! Module-local errors (`PersistenceError`, `CacheError`, ...) stay close
//! to their code; this enum is the engine-boundary classification that
//! decides retry / continue / terminate.

use miette::Diagnostic;
use thiserror::Error;

use crate::actions::ActionError;
use crate::cache::CacheError;
use crate::persistence::PersistenceError;
use crate::resources::ResourceError;
use crate::storage::StorageError;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// Strategy or params failed validation. Permanent; the job fails at
    /// Validating.
    #[error("validation error: {message}")]
    #[diagnostic(code(ontoflow::engine::validation))]
    Validation { message: String },

    /// A required resource could not be brought to Healthy.
    #[error(transparent)]
    #[diagnostic(code(ontoflow::engine::resource))]
    Resource(#[from] ResourceError),

    /// An action raised; retry policy decides what happens next.
    #[error(transparent)]
    #[diagnostic(code(ontoflow::engine::action))]
    Action(#[from] ActionError),

    /// Cache layer failure. Recoverable: callers continue without cache.
    #[error(transparent)]
    #[diagnostic(code(ontoflow::engine::cache))]
    Cache(#[from] CacheError),

    /// Blob storage failure.
    #[error(transparent)]
    #[diagnostic(code(ontoflow::engine::storage))]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(code(ontoflow::engine::persistence))]
    Persistence(#[from] PersistenceError),

    /// A checkpoint restore failed during resume.
    #[error("resume error: {message}")]
    #[diagnostic(
        code(ontoflow::engine::resume),
        help("Fall back to an older checkpoint or restart the job from scratch.")
    )]
    Resume { message: String },

    /// Per-job wall-clock bound exceeded. Terminal.
    #[error("job timed out after {seconds}s")]
    #[diagnostic(code(ontoflow::engine::timeout))]
    Timeout { seconds: u64 },

    /// Cooperative cancellation observed.
    #[error("job cancelled")]
    #[diagnostic(code(ontoflow::engine::cancelled))]
    Cancelled,

    /// Strategy references an action type nothing registered.
    #[error("unknown action type: {action_type}")]
    #[diagnostic(
        code(ontoflow::engine::unknown_action),
        help("Register the action in the ActionRegistry at boot.")
    )]
    UnknownAction { action_type: String },

    #[error("job not found: {job_id}")]
    #[diagnostic(code(ontoflow::engine::job_not_found))]
    JobNotFound { job_id: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
