//! Persistence models: explicit serde-friendly shapes decoupled from the
//! in-memory types, plus the conversions between the two.
//!
//! Conversion logic is localized here (`From` / `TryFrom` impls) so the
//! service code stays declarative. This module performs no I/O.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::{ContextConfig, ExecutionContext, ProvenanceEntry, StepResultEntry};
use crate::strategy::CheckpointPolicy;
use crate::types::{CheckpointKind, JobStatus, LogLevel};

/// Per-job execution options supplied at submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Wall-clock bound for the whole job.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Overrides the strategy document's checkpoint policy when set.
    #[serde(default)]
    pub checkpoint_policy: Option<CheckpointPolicy>,
    /// Checkpoint retention, in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u16,
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_retention_days() -> u16 {
    7
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            checkpoint_policy: None,
            retention_days: default_retention_days(),
        }
    }
}

/// A `jobs` row.
#[derive(Clone, Debug)]
pub struct JobRow {
    pub id: Uuid,
    pub strategy_name: String,
    pub strategy_doc: Value,
    pub parameters: Value,
    pub options: ExecutionOptions,
    pub status: JobStatus,
    pub current_step_index: u32,
    pub total_steps: u32,
    pub progress_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub final_results: Option<Value>,
    pub owner: Option<String>,
    pub session_tag: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub memory_mb_peak: Option<f64>,
    pub retry_count: u32,
}

/// An `execution_steps` row.
#[derive(Clone, Debug)]
pub struct StepRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_index: u32,
    pub step_name: String,
    pub action_type: String,
    pub input_params: Value,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output_results: Option<Value>,
    pub retry_count: u32,
    pub can_retry: bool,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    pub metrics: StepMetrics,
}

/// Numeric counters recorded against a step.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    pub records_processed: Option<i64>,
    pub records_matched: Option<i64>,
    pub records_failed: Option<i64>,
    pub confidence_score: Option<f64>,
    pub memory_used_mb: Option<f64>,
}

/// An `execution_checkpoints` row, minus the (possibly external) payload.
#[derive(Clone, Debug)]
pub struct CheckpointRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_index: u32,
    pub kind: CheckpointKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub storage_path: Option<String>,
    pub size_bytes: i64,
    pub compressed: bool,
    pub is_resumable: bool,
    pub description: Option<String>,
}

/// Outcome of a checkpoint restore.
#[derive(Debug)]
pub struct RestoredCheckpoint {
    pub context: ExecutionContext,
    pub step_index: u32,
    pub job_id: Uuid,
}

/// An `execution_logs` row.
#[derive(Clone, Debug)]
pub struct LogRow {
    pub id: i64,
    pub job_id: Uuid,
    pub step_index: Option<u32>,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<Value>,
    pub category: Option<String>,
    pub component: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A `job_events` row.
#[derive(Clone, Debug)]
pub struct EventRow {
    pub id: i64,
    pub job_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub severity: LogLevel,
    pub step_index: Option<u32>,
    pub step_name: Option<String>,
    pub data: Value,
    pub message: Option<String>,
    pub delivered: bool,
    pub delivery_attempts: u32,
}

/// A `result_storage` row, minus the payload.
#[derive(Clone, Debug)]
pub struct ResultRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_index: u32,
    pub result_key: String,
    pub storage_kind: String,
    pub external_path: Option<String>,
    pub size_bytes: i64,
    pub content_type: String,
    pub encoding: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub accessed_count: u32,
    pub last_accessed: Option<DateTime<Utc>>,
}

/// Aggregate metrics for a job, derived from its step rows.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobMetrics {
    pub job_id: String,
    pub status: Option<JobStatus>,
    pub total_steps: u32,
    pub completed_steps: u32,
    pub failed_steps: u32,
    pub progress_percentage: f64,
    pub total_duration_ms: i64,
    pub total_records_processed: i64,
    pub total_records_matched: i64,
    pub memory_mb_peak: Option<f64>,
    pub retry_count: u32,
}

/* ---------- Persisted execution context ---------- */

/// Wire shape of an [`ExecutionContext`].
///
/// Every field is restricted to the documented serialization universe, so a
/// round-trip through these structs is byte-stable for equal inputs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedContext {
    #[serde(default)]
    pub initial_identifier: Option<String>,
    #[serde(default)]
    pub current_identifier: Option<String>,
    #[serde(default)]
    pub identifier_history: Vec<String>,
    #[serde(default)]
    pub ontology_type: Option<String>,
    #[serde(default)]
    pub step_results: Vec<PersistedStepResult>,
    #[serde(default)]
    pub provenance: Vec<PersistedProvenance>,
    #[serde(default)]
    pub custom_action_data: FxHashMap<String, Value>,
    #[serde(default)]
    pub config: PersistedContextConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PersistedStepResult {
    pub step_name: String,
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
    /// RFC3339 string form (keeps chrono types out of the wire shape).
    pub timestamp: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PersistedProvenance {
    pub source: String,
    pub action: String,
    pub timestamp: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PersistedContextConfig {
    pub use_cache: bool,
    pub batch_size: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for PersistedContextConfig {
    fn default() -> Self {
        let cfg = ContextConfig::default();
        Self {
            use_cache: cfg.use_cache,
            batch_size: cfg.batch_size,
            timeout_seconds: cfg.timeout_seconds,
            retry_attempts: cfg.retry_attempts,
        }
    }
}

impl From<&ExecutionContext> for PersistedContext {
    fn from(ctx: &ExecutionContext) -> Self {
        PersistedContext {
            initial_identifier: ctx.initial_identifier.clone(),
            current_identifier: ctx.current_identifier.clone(),
            identifier_history: ctx.identifier_history.clone(),
            ontology_type: ctx.ontology_type.clone(),
            step_results: ctx
                .step_results
                .iter()
                .map(|entry| PersistedStepResult {
                    step_name: entry.step_name.clone(),
                    success: entry.success,
                    data: entry.data.clone(),
                    error: entry.error.clone(),
                    timestamp: entry.timestamp.to_rfc3339(),
                })
                .collect(),
            provenance: ctx
                .provenance
                .iter()
                .map(|p| PersistedProvenance {
                    source: p.source.clone(),
                    action: p.action.clone(),
                    timestamp: p.timestamp.to_rfc3339(),
                    details: p.details.clone(),
                })
                .collect(),
            custom_action_data: ctx.custom_action_data.clone(),
            config: PersistedContextConfig {
                use_cache: ctx.config.use_cache,
                batch_size: ctx.config.batch_size,
                timeout_seconds: ctx.config.timeout_seconds,
                retry_attempts: ctx.config.retry_attempts,
            },
        }
    }
}

impl From<PersistedContext> for ExecutionContext {
    fn from(p: PersistedContext) -> Self {
        ExecutionContext {
            initial_identifier: p.initial_identifier,
            current_identifier: p.current_identifier,
            identifier_history: p.identifier_history,
            ontology_type: p.ontology_type,
            step_results: p
                .step_results
                .into_iter()
                .map(|entry| StepResultEntry {
                    step_name: entry.step_name,
                    success: entry.success,
                    data: entry.data,
                    error: entry.error,
                    timestamp: parse_rfc3339(&entry.timestamp),
                })
                .collect(),
            provenance: p
                .provenance
                .into_iter()
                .map(|entry| ProvenanceEntry {
                    source: entry.source,
                    action: entry.action,
                    timestamp: parse_rfc3339(&entry.timestamp),
                    details: entry.details,
                })
                .collect(),
            custom_action_data: p.custom_action_data,
            config: ContextConfig {
                use_cache: p.config.use_cache,
                batch_size: p.config.batch_size,
                timeout_seconds: p.config.timeout_seconds,
                retry_attempts: p.config.retry_attempts,
            },
        }
    }
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
