//! Memoization layer for identifier-mapping results.
//!
//! Cached rows are keyed on the four-tuple (source_id, source_type,
//! target_id, target_type); uniqueness is enforced by the database so a
//! second writer producing the same row is absorbed, never an error.
//! Cache failures are recoverable by design: callers log and continue
//! without the cache, and no job ever fails on a cache error alone.

pub mod confidence;
pub mod manager;

pub use confidence::{derive_confidence, determine_mapping_source, StepResourceInfo};
pub use manager::{CacheManager, CachedMapping};

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("cache retrieval failed: {message}")]
    #[diagnostic(
        code(ontoflow::cache::retrieval),
        help("The caller should fall back to executing the mapping without the cache.")
    )]
    Retrieval { message: String },

    #[error("cache storage failed: {message}")]
    #[diagnostic(code(ontoflow::cache::storage))]
    Storage { message: String },

    #[error("cache transaction failed: {message}")]
    #[diagnostic(code(ontoflow::cache::transaction))]
    Transaction { message: String },
}

pub type Result<T> = std::result::Result<T, CacheError>;
