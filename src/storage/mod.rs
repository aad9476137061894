//! Opaque byte-blob storage for oversize checkpoints and step results.
//!
//! The persistence layer writes blobs *before* committing the row that
//! references them, so a crash can only strand a blob, never dangle a row.
//! Stranded blobs are reclaimed by `cleanup_old_data`.

pub mod filesystem;

pub use filesystem::FileSystemStorage;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("blob not found at {location}")]
    #[diagnostic(
        code(ontoflow::storage::not_found),
        help("The referenced blob may have been garbage-collected; check retention settings.")
    )]
    NotFound { location: String },

    #[error("storage I/O error at {location}: {source}")]
    #[diagnostic(code(ontoflow::storage::io))]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Backend contract for blob storage.
///
/// Locations returned by the store operations are opaque strings; callers
/// persist them verbatim and hand them back to the retrieve/delete
/// operations. The default implementation is the local filesystem; object
/// store variants can slot in behind the same trait.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store serialized checkpoint bytes; returns an opaque location.
    async fn store_checkpoint(&self, job_id: Uuid, step_index: u32, data: &[u8])
        -> Result<String>;

    async fn retrieve_checkpoint(&self, location: &str) -> Result<Vec<u8>>;

    /// Store result bytes under a per-step key; returns an opaque location.
    async fn store_result(
        &self,
        job_id: Uuid,
        step_index: u32,
        key: &str,
        data: &[u8],
    ) -> Result<String>;

    async fn retrieve_result(&self, location: &str) -> Result<Vec<u8>>;

    /// Delete a single blob. Returns `false` if the location does not exist;
    /// any other failure is an error.
    async fn delete(&self, location: &str) -> Result<bool>;

    /// Remove every blob belonging to a job (cascade deletion).
    async fn delete_job_blobs(&self, job_id: Uuid) -> Result<()>;
}
