use std::fmt;
use thiserror::Error;

use super::event::JobEvent;

/// Abstract emitter handed to components that publish events; cheap to
/// clone behind an `Arc`.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    /// Emit an event in a synchronous, non-blocking manner.
    fn emit(&self, event: JobEvent) -> Result<(), EmitterError>;
}

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event hub closed")]
    Closed,
    #[error("event lag exceeded buffer; dropped {0} messages")]
    Lagged(usize),
    #[error("event emission failed: {0}")]
    Other(String),
}

/// Emitter that discards everything; useful when a component is exercised
/// without a bus attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: JobEvent) -> Result<(), EmitterError> {
        Ok(())
    }
}
