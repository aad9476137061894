//! The action contract and the process-wide action registry.
//!
//! An action is a named unit of work invoked by the engine with typed-ish
//! parameters and the live execution context. Concrete mapping actions live
//! outside this crate; the engine knows only this contract.

pub mod registry;
pub mod schema;

pub use registry::{ActionDescriptor, ActionRegistry, ActionRegistryBuilder};
pub use schema::{ParamField, ParamKind, ParamSchema};

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;

#[derive(Debug, Error, Diagnostic)]
pub enum ActionError {
    /// Parameter validation failure. Permanent: never retried.
    #[error("invalid params for {action_type}: {message}")]
    #[diagnostic(
        code(ontoflow::actions::invalid_params),
        help("Fix the step's params in the strategy document; validation failures are not retried.")
    )]
    InvalidParams {
        action_type: String,
        message: String,
    },

    /// The action raised. May be retried per the step's `on_error` policy.
    #[error("action failed: {message}")]
    #[diagnostic(code(ontoflow::actions::failed))]
    Failed { message: String },

    /// Cooperative cancellation was observed mid-action.
    #[error("action cancelled")]
    #[diagnostic(code(ontoflow::actions::cancelled))]
    Cancelled,
}

impl ActionError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed {
            message: message.into(),
        }
    }

    /// Whether the retry policy may re-attempt after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Failed { .. })
    }
}

/// Structured output of a single action invocation.
///
/// `data` holds whatever the action wants to publish into the context;
/// everything must fit the documented serialization universe.
#[derive(Clone, Debug, Default)]
pub struct StepOutput {
    pub success: bool,
    pub records_processed: Option<i64>,
    pub records_matched: Option<i64>,
    pub records_failed: Option<i64>,
    pub confidence_score: Option<f64>,
    pub memory_used_mb: Option<f64>,
    pub data: FxHashMap<String, Value>,
}

impl StepOutput {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_records(mut self, processed: i64, matched: i64) -> Self {
        self.records_processed = Some(processed);
        self.records_matched = Some(matched);
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// The JSON shape attached to the context and persisted with the step.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("success".into(), Value::Bool(self.success));
        if let Some(v) = self.records_processed {
            map.insert("records_processed".into(), v.into());
        }
        if let Some(v) = self.records_matched {
            map.insert("records_matched".into(), v.into());
        }
        if let Some(v) = self.records_failed {
            map.insert("records_failed".into(), v.into());
        }
        if let Some(v) = self.confidence_score {
            map.insert("confidence_score".into(), serde_json::json!(v));
        }
        for (k, v) in &self.data {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

/// Contract every action implementation must satisfy.
///
/// Actions are cooperative: they may suspend on I/O and must observe the
/// cancellation token promptly. Partial side effects of a cancelled action
/// are not rolled back; checkpoints are the recovery primitive.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(
        &self,
        params: &Value,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, ActionError>;
}
