//! The persistence service: every durable write the engine makes goes
//! through here.
//!
//! All writes for a single job serialize on a per-job async lock so
//! concurrent progress updates cannot lose fields; reads are unlocked.
//! External blobs (oversize checkpoints/results) are written *before* the
//! row referencing them is committed.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex as ParkingMutex;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;
use uuid::Uuid;

use crate::events::{EventEmitter, EventKind, JobEvent};
use crate::strategy::StrategyDoc;
use crate::types::{CheckpointKind, JobStatus, LogLevel};

use super::models::{
    CheckpointRow, EventRow, ExecutionOptions, JobMetrics, JobRow, LogRow, PersistedContext,
    RestoredCheckpoint, ResultRow, StepMetrics, StepRow,
};
use super::{compress, decompress, PersistenceError, Result};
use crate::context::ExecutionContext;
use crate::storage::StorageBackend;

/// Default maximum serialized size stored inline in a row (64 KiB).
pub const DEFAULT_MAX_INLINE: usize = 64 * 1024;
/// Default threshold above which payloads are zlib-compressed (100 KiB).
pub const DEFAULT_COMPRESS_THRESHOLD: usize = 100 * 1024;

/// Everything needed to create a job.
#[derive(Clone, Debug)]
pub struct NewJob {
    pub strategy_name: String,
    pub strategy_doc: StrategyDoc,
    pub parameters: Value,
    pub options: ExecutionOptions,
    pub owner: Option<String>,
    pub session_tag: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
}

/// Optional fields attached to a status update.
#[derive(Clone, Debug, Default)]
pub struct JobStatusUpdate {
    pub current_step_index: Option<u32>,
    pub progress_percentage: Option<f64>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub final_results: Option<Value>,
    pub memory_mb_peak: Option<f64>,
    pub retry_count: Option<u32>,
}

/// Filters for [`PersistenceService::list_jobs`].
#[derive(Clone, Debug, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub strategy_name: Option<String>,
    pub owner: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/// Counts reported by [`PersistenceService::cleanup_old_data`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub jobs_deleted: u64,
    pub checkpoints_deleted: u64,
    pub results_deleted: u64,
}

pub struct PersistenceService {
    pool: SqlitePool,
    storage: Arc<dyn StorageBackend>,
    emitter: RwLock<Option<Arc<dyn EventEmitter>>>,
    max_inline: usize,
    compress_threshold: usize,
    job_locks: ParkingMutex<FxHashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl std::fmt::Debug for PersistenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceService")
            .field("max_inline", &self.max_inline)
            .field("compress_threshold", &self.compress_threshold)
            .finish()
    }
}

impl PersistenceService {
    /// Connect (or create) the SQLite database at `database_url` and run
    /// embedded migrations. Example URL: `sqlite://ontoflow.db`.
    #[instrument(skip(database_url, storage))]
    pub async fn connect(
        database_url: &str,
        storage: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        // Ensure the underlying sqlite file exists before connecting.
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.trim();
            if !path.is_empty() && path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if !p.exists() {
                    let _ = std::fs::File::create_new(p);
                }
            }
        }
        let pool = SqlitePool::connect(database_url).await?;
        #[cfg(feature = "sqlite-migrations")]
        {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| PersistenceError::Migration(e.to_string()))?;
        }
        Ok(Self::from_pool(pool, storage))
    }

    /// Build a service over an already-connected pool (tests, embedders that
    /// share a pool with the cache manager).
    #[must_use]
    pub fn from_pool(pool: SqlitePool, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            pool,
            storage,
            emitter: RwLock::new(None),
            max_inline: DEFAULT_MAX_INLINE,
            compress_threshold: DEFAULT_COMPRESS_THRESHOLD,
            job_locks: ParkingMutex::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, max_inline: usize, compress_threshold: usize) -> Self {
        self.max_inline = max_inline;
        self.compress_threshold = compress_threshold;
        self
    }

    /// Attach a live emitter; every persisted event is also forwarded to it.
    pub fn set_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.emitter.write() = Some(emitter);
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[must_use]
    pub fn compress_threshold(&self) -> usize {
        self.compress_threshold
    }

    fn job_lock(&self, job_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.job_locks.lock();
        locks
            .entry(job_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /* ---------- Job lifecycle ---------- */

    #[instrument(skip(self, new_job), err)]
    pub async fn create_job(&self, new_job: NewJob) -> Result<JobRow> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let strategy_doc = serde_json::to_value(&new_job.strategy_doc)?;
        let total_steps = new_job.strategy_doc.total_steps();

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, strategy_name, strategy_doc, parameters, options, status,
                current_step_index, total_steps, progress_percentage,
                created_at, last_updated, owner, session_tag, tags, description,
                retry_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 0, ?8, ?8, ?9, ?10, ?11, ?12, 0)
            "#,
        )
        .bind(id.to_string())
        .bind(&new_job.strategy_name)
        .bind(strategy_doc.to_string())
        .bind(new_job.parameters.to_string())
        .bind(serde_json::to_string(&new_job.options)?)
        .bind(JobStatus::Pending.as_str())
        .bind(i64::from(total_steps))
        .bind(now)
        .bind(&new_job.owner)
        .bind(&new_job.session_tag)
        .bind(serde_json::to_string(&new_job.tags)?)
        .bind(&new_job.description)
        .execute(&self.pool)
        .await?;

        self.log(
            id,
            LogLevel::Info,
            &format!("Job created: {}", new_job.strategy_name),
            None,
            None,
            None,
            Some("persistence"),
        )
        .await?;
        self.emit_event(
            JobEvent::new(
                id,
                EventKind::JobCreated,
                serde_json::json!({"strategy": new_job.strategy_name}),
            ),
        )
        .await?;

        self.get_job(id)
            .await?
            .ok_or(PersistenceError::JobNotFound {
                job_id: id.to_string(),
            })
    }

    /// Apply a status transition, enforcing the state machine.
    ///
    /// `started_at` is stamped on the first transition into Running;
    /// `completed_at` and `execution_time_ms` are stamped when entering a
    /// terminal state.
    #[instrument(skip(self, fields), err)]
    pub async fn update_job_status(
        &self,
        job_id: Uuid,
        new_status: JobStatus,
        fields: JobStatusUpdate,
    ) -> Result<JobRow> {
        let lock = self.job_lock(job_id);
        let _guard = lock.lock().await;

        let current = self
            .get_job(job_id)
            .await?
            .ok_or(PersistenceError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        if !current.status.can_transition_to(new_status) {
            return Err(PersistenceError::IllegalTransition {
                from: current.status,
                to: new_status,
            });
        }

        let now = Utc::now();
        let started_at = match (current.started_at, new_status) {
            (None, JobStatus::Running) => Some(now),
            (existing, _) => existing,
        };
        let (completed_at, execution_time_ms) = if new_status.is_terminal() {
            let completed = current.completed_at.unwrap_or(now);
            let elapsed = started_at
                .map(|s| (completed - s).num_milliseconds())
                .or(current.execution_time_ms);
            (Some(completed), elapsed)
        } else {
            (current.completed_at, current.execution_time_ms)
        };

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = ?2,
                last_updated = ?3,
                started_at = ?4,
                completed_at = ?5,
                execution_time_ms = ?6,
                current_step_index = COALESCE(?7, current_step_index),
                progress_percentage = COALESCE(?8, progress_percentage),
                error_message = COALESCE(?9, error_message),
                error_details = COALESCE(?10, error_details),
                final_results = COALESCE(?11, final_results),
                memory_mb_peak = COALESCE(?12, memory_mb_peak),
                retry_count = COALESCE(?13, retry_count)
            WHERE id = ?1
            "#,
        )
        .bind(job_id.to_string())
        .bind(new_status.as_str())
        .bind(now)
        .bind(started_at)
        .bind(completed_at)
        .bind(execution_time_ms)
        .bind(fields.current_step_index.map(i64::from))
        .bind(fields.progress_percentage)
        .bind(&fields.error_message)
        .bind(fields.error_details.as_ref().map(Value::to_string))
        .bind(fields.final_results.as_ref().map(Value::to_string))
        .bind(fields.memory_mb_peak)
        .bind(fields.retry_count.map(i64::from))
        .execute(&self.pool)
        .await?;

        if current.status != new_status {
            self.emit_event(
                JobEvent::new(
                    job_id,
                    EventKind::StatusChange,
                    serde_json::json!({
                        "old_status": current.status.as_str(),
                        "new_status": new_status.as_str(),
                    }),
                ),
            )
            .await?;
        }

        self.get_job(job_id)
            .await?
            .ok_or(PersistenceError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    #[instrument(skip(self), err)]
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRow>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    #[instrument(skip(self, filter), err)]
    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<JobRow>> {
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        let mut conditions = Vec::new();
        if filter.status.is_some() {
            conditions.push("status = ?1");
        }
        if filter.strategy_name.is_some() {
            conditions.push("strategy_name = ?2");
        }
        if filter.owner.is_some() {
            conditions.push("owner = ?3");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT * FROM jobs {where_clause} ORDER BY created_at DESC LIMIT ?4 OFFSET ?5"
        );

        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(&filter.strategy_name)
            .bind(&filter.owner)
            .bind(i64::from(limit))
            .bind(i64::from(filter.offset))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_job).collect()
    }

    /* ---------- Step management ---------- */

    #[instrument(skip(self, params), err)]
    pub async fn record_step_start(
        &self,
        job_id: Uuid,
        step_index: u32,
        step_name: &str,
        action_type: &str,
        params: &Value,
    ) -> Result<StepRow> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or(PersistenceError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        {
            let lock = self.job_lock(job_id);
            let _guard = lock.lock().await;
            let now = Utc::now();
            // Re-running a step after a retry/resume replaces its row.
            sqlx::query(
                r#"
                INSERT INTO execution_steps (
                    id, job_id, step_index, step_name, action_type, input_params,
                    status, started_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (job_id, step_index) DO UPDATE SET
                    step_name = excluded.step_name,
                    action_type = excluded.action_type,
                    input_params = excluded.input_params,
                    status = excluded.status,
                    started_at = excluded.started_at,
                    completed_at = NULL,
                    duration_ms = NULL,
                    error_message = NULL,
                    error_traceback = NULL
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(job_id.to_string())
            .bind(i64::from(step_index))
            .bind(step_name)
            .bind(action_type)
            .bind(params.to_string())
            .bind(JobStatus::Running.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;
        }

        let progress = if job.total_steps > 0 {
            f64::from(step_index) / f64::from(job.total_steps) * 100.0
        } else {
            0.0
        };
        self.update_job_status(
            job_id,
            JobStatus::Running,
            JobStatusUpdate {
                current_step_index: Some(step_index),
                progress_percentage: Some(progress),
                ..Default::default()
            },
        )
        .await?;

        self.log(
            job_id,
            LogLevel::Info,
            &format!("Step {step_name} started"),
            Some(step_index),
            None,
            None,
            Some("engine"),
        )
        .await?;
        self.emit_event(
            JobEvent::new(
                job_id,
                EventKind::StepStarted,
                serde_json::json!({"step_name": step_name, "step_index": step_index}),
            )
            .with_step(step_index, step_name),
        )
        .await?;

        self.get_step(job_id, step_index)
            .await?
            .ok_or(PersistenceError::StepNotFound {
                job_id: job_id.to_string(),
                step_index,
            })
    }

    #[instrument(skip(self, output, metrics), err)]
    pub async fn record_step_completion(
        &self,
        job_id: Uuid,
        step_index: u32,
        output: &Value,
        metrics: StepMetrics,
    ) -> Result<StepRow> {
        let step = self
            .get_step(job_id, step_index)
            .await?
            .ok_or(PersistenceError::StepNotFound {
                job_id: job_id.to_string(),
                step_index,
            })?;
        let now = Utc::now();
        let duration_ms = step.started_at.map(|s| (now - s).num_milliseconds());

        let serialized = output.to_string();
        let inline = serialized.len() < self.max_inline;
        if !inline {
            self.store_result(job_id, step_index, "step_output", output, 30)
                .await?;
        }

        {
            let lock = self.job_lock(job_id);
            let _guard = lock.lock().await;
            sqlx::query(
                r#"
                UPDATE execution_steps SET
                    status = ?3, completed_at = ?4, duration_ms = ?5,
                    output_results = ?6,
                    records_processed = ?7, records_matched = ?8,
                    records_failed = ?9, confidence_score = ?10,
                    memory_used_mb = ?11
                WHERE job_id = ?1 AND step_index = ?2
                "#,
            )
            .bind(job_id.to_string())
            .bind(i64::from(step_index))
            .bind(JobStatus::Completed.as_str())
            .bind(now)
            .bind(duration_ms)
            .bind(if inline { Some(serialized) } else { None })
            .bind(metrics.records_processed)
            .bind(metrics.records_matched)
            .bind(metrics.records_failed)
            .bind(metrics.confidence_score)
            .bind(metrics.memory_used_mb)
            .execute(&self.pool)
            .await?;
        }

        self.log(
            job_id,
            LogLevel::Info,
            &format!("Step {} completed", step.step_name),
            Some(step_index),
            None,
            None,
            Some("engine"),
        )
        .await?;
        self.emit_event(
            JobEvent::new(
                job_id,
                EventKind::StepCompleted,
                serde_json::json!({
                    "step_name": step.step_name,
                    "step_index": step_index,
                    "metrics": metrics,
                }),
            )
            .with_step(step_index, &step.step_name),
        )
        .await?;

        self.get_step(job_id, step_index)
            .await?
            .ok_or(PersistenceError::StepNotFound {
                job_id: job_id.to_string(),
                step_index,
            })
    }

    #[instrument(skip(self, error_traceback), err)]
    pub async fn record_step_failure(
        &self,
        job_id: Uuid,
        step_index: u32,
        error_message: &str,
        error_traceback: Option<&str>,
        retry_count: u32,
        can_retry: bool,
    ) -> Result<StepRow> {
        let step = self
            .get_step(job_id, step_index)
            .await?
            .ok_or(PersistenceError::StepNotFound {
                job_id: job_id.to_string(),
                step_index,
            })?;
        let now = Utc::now();

        {
            let lock = self.job_lock(job_id);
            let _guard = lock.lock().await;
            sqlx::query(
                r#"
                UPDATE execution_steps SET
                    status = ?3, completed_at = ?4, error_message = ?5,
                    error_traceback = ?6, retry_count = ?7, can_retry = ?8
                WHERE job_id = ?1 AND step_index = ?2
                "#,
            )
            .bind(job_id.to_string())
            .bind(i64::from(step_index))
            .bind(JobStatus::Failed.as_str())
            .bind(now)
            .bind(error_message)
            .bind(error_traceback)
            .bind(i64::from(retry_count))
            .bind(can_retry)
            .execute(&self.pool)
            .await?;
        }

        self.log(
            job_id,
            LogLevel::Error,
            &format!("Step {} failed: {error_message}", step.step_name),
            Some(step_index),
            None,
            None,
            Some("engine"),
        )
        .await?;
        self.emit_event(
            JobEvent::new(
                job_id,
                EventKind::StepFailed,
                serde_json::json!({
                    "step_name": step.step_name,
                    "step_index": step_index,
                    "error": error_message,
                    "can_retry": can_retry,
                }),
            )
            .with_step(step_index, &step.step_name)
            .with_severity(LogLevel::Error),
        )
        .await?;

        self.get_step(job_id, step_index)
            .await?
            .ok_or(PersistenceError::StepNotFound {
                job_id: job_id.to_string(),
                step_index,
            })
    }

    /// Record how many retries a step consumed before it finally settled.
    pub async fn set_step_retry_count(
        &self,
        job_id: Uuid,
        step_index: u32,
        retry_count: u32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE execution_steps SET retry_count = ?3 WHERE job_id = ?1 AND step_index = ?2",
        )
        .bind(job_id.to_string())
        .bind(i64::from(step_index))
        .bind(i64::from(retry_count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_step(&self, job_id: Uuid, step_index: u32) -> Result<Option<StepRow>> {
        let row =
            sqlx::query("SELECT * FROM execution_steps WHERE job_id = ?1 AND step_index = ?2")
                .bind(job_id.to_string())
                .bind(i64::from(step_index))
                .fetch_optional(&self.pool)
                .await?;
        row.map(row_to_step).transpose()
    }

    pub async fn list_steps(&self, job_id: Uuid) -> Result<Vec<StepRow>> {
        let rows =
            sqlx::query("SELECT * FROM execution_steps WHERE job_id = ?1 ORDER BY step_index")
                .bind(job_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(row_to_step).collect()
    }

    /* ---------- Checkpoints ---------- */

    /// Serialize the context, compress above the threshold, store inline or
    /// externally depending on size, and record the checkpoint row.
    #[instrument(skip(self, context, description), err)]
    pub async fn create_checkpoint(
        &self,
        job_id: Uuid,
        step_index: u32,
        context: &ExecutionContext,
        kind: CheckpointKind,
        description: Option<&str>,
    ) -> Result<CheckpointRow> {
        let retention_days = self
            .get_job(job_id)
            .await?
            .map(|j| i64::from(j.options.retention_days))
            .unwrap_or(7);

        let persisted = PersistedContext::from(context);
        let mut payload = serde_json::to_vec(&persisted)?;
        let compressed = payload.len() > self.compress_threshold;
        if compressed {
            payload = compress(&payload)?;
        }
        let size_bytes = payload.len();
        let external = size_bytes >= self.max_inline;

        let storage_path = if external {
            Some(
                self.storage
                    .store_checkpoint(job_id, step_index, &payload)
                    .await?,
            )
        } else {
            None
        };

        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + ChronoDuration::days(retention_days);

        {
            let lock = self.job_lock(job_id);
            let _guard = lock.lock().await;
            sqlx::query(
                r#"
                INSERT INTO execution_checkpoints (
                    id, job_id, step_index, checkpoint_type, created_at,
                    expires_at, context_data, storage_path, size_bytes,
                    compressed, is_resumable, description
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11)
                "#,
            )
            .bind(id.to_string())
            .bind(job_id.to_string())
            .bind(i64::from(step_index))
            .bind(kind.as_str())
            .bind(now)
            .bind(expires_at)
            .bind(if external { None } else { Some(payload) })
            .bind(&storage_path)
            .bind(size_bytes as i64)
            .bind(compressed)
            .bind(description)
            .execute(&self.pool)
            .await?;
        }

        self.log(
            job_id,
            LogLevel::Debug,
            &format!("Checkpoint created at step {step_index}"),
            Some(step_index),
            Some(serde_json::json!({"checkpoint_id": id.to_string(), "type": kind.as_str()})),
            None,
            Some("persistence"),
        )
        .await?;
        self.emit_event(
            JobEvent::new(
                job_id,
                EventKind::CheckpointCreated,
                serde_json::json!({"checkpoint_id": id.to_string(), "step_index": step_index}),
            ),
        )
        .await?;

        self.get_checkpoint(id)
            .await?
            .ok_or(PersistenceError::CheckpointNotFound {
                checkpoint_id: id.to_string(),
            })
    }

    /// Restore a checkpoint, reversing the compression/storage decisions
    /// byte-identically.
    #[instrument(skip(self), err)]
    pub async fn restore_checkpoint(&self, checkpoint_id: Uuid) -> Result<RestoredCheckpoint> {
        let row = sqlx::query("SELECT * FROM execution_checkpoints WHERE id = ?1")
            .bind(checkpoint_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PersistenceError::CheckpointNotFound {
                checkpoint_id: checkpoint_id.to_string(),
            })?;

        let is_resumable: bool = row.get("is_resumable");
        if !is_resumable {
            return Err(PersistenceError::NotResumable {
                checkpoint_id: checkpoint_id.to_string(),
            });
        }
        let job_id = parse_uuid(&row.get::<String, _>("job_id"), "job_id")?;
        let step_index = row.get::<i64, _>("step_index") as u32;
        let compressed: bool = row.get("compressed");
        let inline: Option<Vec<u8>> = row.get("context_data");
        let storage_path: Option<String> = row.get("storage_path");

        let mut payload = match (inline, storage_path) {
            (Some(bytes), _) => bytes,
            (None, Some(path)) => self.storage.retrieve_checkpoint(&path).await?,
            (None, None) => return Err(PersistenceError::Corrupt("checkpoint payload")),
        };
        if compressed {
            payload = decompress(&payload)?;
        }
        let persisted: PersistedContext = serde_json::from_slice(&payload)?;

        self.log(
            job_id,
            LogLevel::Info,
            &format!("Restored from checkpoint at step {step_index}"),
            None,
            Some(serde_json::json!({"checkpoint_id": checkpoint_id.to_string()})),
            None,
            Some("persistence"),
        )
        .await?;

        Ok(RestoredCheckpoint {
            context: ExecutionContext::from(persisted),
            step_index,
            job_id,
        })
    }

    pub async fn get_checkpoint(&self, checkpoint_id: Uuid) -> Result<Option<CheckpointRow>> {
        let row = sqlx::query("SELECT * FROM execution_checkpoints WHERE id = ?1")
            .bind(checkpoint_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_checkpoint).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn list_checkpoints(&self, job_id: Uuid, limit: u32) -> Result<Vec<CheckpointRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM execution_checkpoints
            WHERE job_id = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(job_id.to_string())
        .bind(i64::from(if limit == 0 { 10 } else { limit }))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_checkpoint).collect()
    }

    pub async fn get_latest_checkpoint(&self, job_id: Uuid) -> Result<Option<CheckpointRow>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM execution_checkpoints
            WHERE job_id = ?1 AND is_resumable = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_checkpoint).transpose()
    }

    /// Checkpoint selection for resume: the resumable checkpoint with the
    /// largest step_index strictly below `target_step`.
    pub async fn find_resume_checkpoint(
        &self,
        job_id: Uuid,
        target_step: u32,
    ) -> Result<Option<CheckpointRow>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM execution_checkpoints
            WHERE job_id = ?1 AND is_resumable = 1 AND step_index < ?2
            ORDER BY step_index DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(job_id.to_string())
        .bind(i64::from(target_step))
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_checkpoint).transpose()
    }

    /* ---------- Result storage ---------- */

    #[instrument(skip(self, data), err)]
    pub async fn store_result(
        &self,
        job_id: Uuid,
        step_index: u32,
        result_key: &str,
        data: &Value,
        ttl_days: u16,
    ) -> Result<ResultRow> {
        let mut payload = serde_json::to_vec(data)?;
        let encoding = if payload.len() > self.compress_threshold {
            payload = compress(&payload)?;
            Some("deflate")
        } else {
            None
        };
        let size_bytes = payload.len();
        let external = size_bytes >= self.max_inline;

        let external_path = if external {
            Some(
                self.storage
                    .store_result(job_id, step_index, result_key, &payload)
                    .await?,
            )
        } else {
            None
        };

        let id = Uuid::new_v4();
        let expires_at = Utc::now() + ChronoDuration::days(i64::from(ttl_days));
        {
            let lock = self.job_lock(job_id);
            let _guard = lock.lock().await;
            sqlx::query(
                r#"
                INSERT INTO result_storage (
                    id, job_id, step_index, result_key, storage_kind,
                    inline_data, external_path, size_bytes, content_type,
                    encoding, expires_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'application/json', ?9, ?10)
                ON CONFLICT (job_id, step_index, result_key) DO UPDATE SET
                    storage_kind = excluded.storage_kind,
                    inline_data = excluded.inline_data,
                    external_path = excluded.external_path,
                    size_bytes = excluded.size_bytes,
                    encoding = excluded.encoding,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(id.to_string())
            .bind(job_id.to_string())
            .bind(i64::from(step_index))
            .bind(result_key)
            .bind(if external { "filesystem" } else { "inline" })
            .bind(if external { None } else { Some(payload) })
            .bind(&external_path)
            .bind(size_bytes as i64)
            .bind(encoding)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        }

        let row = sqlx::query(
            "SELECT * FROM result_storage WHERE job_id = ?1 AND step_index = ?2 AND result_key = ?3",
        )
        .bind(job_id.to_string())
        .bind(i64::from(step_index))
        .bind(result_key)
        .fetch_one(&self.pool)
        .await?;
        row_to_result(row)
    }

    /// Retrieve a stored result, maintaining access tracking.
    #[instrument(skip(self), err)]
    pub async fn retrieve_result(
        &self,
        job_id: Uuid,
        step_index: u32,
        result_key: &str,
    ) -> Result<Option<Value>> {
        let row = sqlx::query(
            "SELECT * FROM result_storage WHERE job_id = ?1 AND step_index = ?2 AND result_key = ?3",
        )
        .bind(job_id.to_string())
        .bind(i64::from(step_index))
        .bind(result_key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };

        let id: String = row.get("id");
        sqlx::query(
            "UPDATE result_storage SET accessed_count = accessed_count + 1, last_accessed = ?2 WHERE id = ?1",
        )
        .bind(&id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let storage_kind: String = row.get("storage_kind");
        let encoding: Option<String> = row.get("encoding");
        let mut payload: Vec<u8> = if storage_kind == "inline" {
            row.get::<Option<Vec<u8>>, _>("inline_data")
                .ok_or(PersistenceError::Corrupt("inline result payload"))?
        } else {
            let path: Option<String> = row.get("external_path");
            let path = path.ok_or(PersistenceError::Corrupt("external result path"))?;
            self.storage.retrieve_result(&path).await?
        };
        if encoding.as_deref() == Some("deflate") {
            payload = decompress(&payload)?;
        }
        Ok(Some(serde_json::from_slice(&payload)?))
    }

    /* ---------- Logging ---------- */

    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        job_id: Uuid,
        level: LogLevel,
        message: &str,
        step_index: Option<u32>,
        details: Option<Value>,
        category: Option<&str>,
        component: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (
                job_id, step_index, log_level, message, details, category,
                component, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(job_id.to_string())
        .bind(step_index.map(i64::from))
        .bind(level.as_str())
        .bind(message)
        .bind(details.as_ref().map(Value::to_string))
        .bind(category)
        .bind(component)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_logs(
        &self,
        job_id: Uuid,
        level: Option<LogLevel>,
        step_index: Option<u32>,
        limit: u32,
    ) -> Result<Vec<LogRow>> {
        let mut sql = String::from("SELECT * FROM execution_logs WHERE job_id = ?1");
        if level.is_some() {
            sql.push_str(" AND log_level = ?2");
        }
        if step_index.is_some() {
            sql.push_str(" AND step_index = ?3");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?4");

        let rows = sqlx::query(&sql)
            .bind(job_id.to_string())
            .bind(level.map(|l| l.as_str()))
            .bind(step_index.map(i64::from))
            .bind(i64::from(if limit == 0 { 100 } else { limit }))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_log).collect()
    }

    /* ---------- Events ---------- */

    /// Persist an event and forward it to the live emitter (if attached).
    /// Forwarding failures are logged, never propagated.
    pub async fn emit_event(&self, event: JobEvent) -> Result<EventRow> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_events (
                job_id, event_type, timestamp, severity, step_index,
                step_name, data, message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(event.job_id.to_string())
        .bind(event.kind.as_str())
        .bind(event.timestamp)
        .bind(event.severity.as_str())
        .bind(event.step_index.map(i64::from))
        .bind(&event.step_name)
        .bind(event.data.to_string())
        .bind(&event.message)
        .execute(&self.pool)
        .await?;

        let emitter = self.emitter.read().clone();
        if let Some(emitter) = emitter {
            if let Err(err) = emitter.emit(event.clone()) {
                tracing::warn!(job_id = %event.job_id, error = %err, "live event forwarding failed");
            }
        }

        let row = sqlx::query("SELECT * FROM job_events WHERE id = ?1")
            .bind(result.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        row_to_event(row)
    }

    pub async fn get_events(
        &self,
        job_id: Uuid,
        since: Option<DateTime<Utc>>,
        event_type: Option<&str>,
        limit: u32,
    ) -> Result<Vec<EventRow>> {
        let mut sql = String::from("SELECT * FROM job_events WHERE job_id = ?1");
        if since.is_some() {
            sql.push_str(" AND timestamp > ?2");
        }
        if event_type.is_some() {
            sql.push_str(" AND event_type = ?3");
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ?4");

        let rows = sqlx::query(&sql)
            .bind(job_id.to_string())
            .bind(since)
            .bind(event_type)
            .bind(i64::from(if limit == 0 { 100 } else { limit }))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_event).collect()
    }

    /// Mark events up to (and including) `up_to_id` as delivered.
    pub async fn mark_events_delivered(&self, job_id: Uuid, up_to_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE job_events
            SET delivered = 1, delivery_attempts = delivery_attempts + 1
            WHERE job_id = ?1 AND id <= ?2 AND delivered = 0
            "#,
        )
        .bind(job_id.to_string())
        .bind(up_to_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /* ---------- Cleanup & metrics ---------- */

    /// Delete terminal jobs older than `days` (cascading rows and blobs),
    /// plus any checkpoint or result past its `expires_at`.
    #[instrument(skip(self), err)]
    pub async fn cleanup_old_data(&self, days: u16) -> Result<CleanupReport> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        let mut report = CleanupReport::default();

        let old_jobs = sqlx::query(
            r#"
            SELECT id FROM jobs
            WHERE completed_at < ?1
              AND status IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        for row in old_jobs {
            let job_id = parse_uuid(&row.get::<String, _>("id"), "id")?;
            self.delete_job(job_id).await?;
            report.jobs_deleted += 1;
        }

        let now = Utc::now();
        let expired_checkpoints = sqlx::query(
            "SELECT id, storage_path FROM execution_checkpoints WHERE expires_at < ?1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        for row in expired_checkpoints {
            if let Some(path) = row.get::<Option<String>, _>("storage_path") {
                let _ = self.storage.delete(&path).await;
            }
            sqlx::query("DELETE FROM execution_checkpoints WHERE id = ?1")
                .bind(row.get::<String, _>("id"))
                .execute(&self.pool)
                .await?;
            report.checkpoints_deleted += 1;
        }

        let expired_results =
            sqlx::query("SELECT id, external_path FROM result_storage WHERE expires_at < ?1")
                .bind(now)
                .fetch_all(&self.pool)
                .await?;
        for row in expired_results {
            if let Some(path) = row.get::<Option<String>, _>("external_path") {
                let _ = self.storage.delete(&path).await;
            }
            sqlx::query("DELETE FROM result_storage WHERE id = ?1")
                .bind(row.get::<String, _>("id"))
                .execute(&self.pool)
                .await?;
            report.results_deleted += 1;
        }

        Ok(report)
    }

    /// Delete a job and everything it owns, including external blobs.
    pub async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        self.storage.delete_job_blobs(job_id).await?;
        let id = job_id.to_string();
        let mut tx = self.pool.begin().await?;
        for table in [
            "execution_steps",
            "execution_checkpoints",
            "execution_logs",
            "job_events",
            "result_storage",
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE job_id = ?1"))
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_job_metrics(&self, job_id: Uuid) -> Result<JobMetrics> {
        let Some(job) = self.get_job(job_id).await? else {
            return Ok(JobMetrics::default());
        };
        let steps = self.list_steps(job_id).await?;

        let completed_steps = steps
            .iter()
            .filter(|s| s.status == JobStatus::Completed)
            .count() as u32;
        let failed_steps = steps
            .iter()
            .filter(|s| s.status == JobStatus::Failed)
            .count() as u32;
        let total_duration_ms = steps.iter().filter_map(|s| s.duration_ms).sum();
        let total_records_processed = steps
            .iter()
            .filter_map(|s| s.metrics.records_processed)
            .sum();
        let total_records_matched = steps
            .iter()
            .filter_map(|s| s.metrics.records_matched)
            .sum();
        let memory_mb_peak = steps
            .iter()
            .filter_map(|s| s.metrics.memory_used_mb)
            .fold(job.memory_mb_peak, |acc, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            });

        Ok(JobMetrics {
            job_id: job_id.to_string(),
            status: Some(job.status),
            total_steps: job.total_steps,
            completed_steps,
            failed_steps,
            progress_percentage: job.progress_percentage,
            total_duration_ms,
            total_records_processed,
            total_records_matched,
            memory_mb_peak,
            retry_count: job.retry_count,
        })
    }
}

/* ---------- Row decoding ---------- */

fn parse_uuid(raw: &str, field: &'static str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| PersistenceError::Corrupt(field))
}

fn parse_status(raw: &str) -> Result<JobStatus> {
    JobStatus::parse(raw).ok_or(PersistenceError::Corrupt("status"))
}

fn parse_json_column(raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
}

fn row_to_job(row: SqliteRow) -> Result<JobRow> {
    let tags: Vec<String> = serde_json::from_str(&row.get::<String, _>("tags"))?;
    let options: ExecutionOptions = serde_json::from_str(&row.get::<String, _>("options"))?;
    Ok(JobRow {
        id: parse_uuid(&row.get::<String, _>("id"), "id")?,
        strategy_name: row.get("strategy_name"),
        strategy_doc: serde_json::from_str(&row.get::<String, _>("strategy_doc"))?,
        parameters: serde_json::from_str(&row.get::<String, _>("parameters"))?,
        options,
        status: parse_status(&row.get::<String, _>("status"))?,
        current_step_index: row.get::<i64, _>("current_step_index") as u32,
        total_steps: row.get::<i64, _>("total_steps") as u32,
        progress_percentage: row.get("progress_percentage"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        last_updated: row.get("last_updated"),
        error_message: row.get("error_message"),
        error_details: parse_json_column(row.get("error_details"))?,
        final_results: parse_json_column(row.get("final_results"))?,
        owner: row.get("owner"),
        session_tag: row.get("session_tag"),
        tags,
        description: row.get("description"),
        execution_time_ms: row.get("execution_time_ms"),
        memory_mb_peak: row.get("memory_mb_peak"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
    })
}

fn row_to_step(row: SqliteRow) -> Result<StepRow> {
    Ok(StepRow {
        id: parse_uuid(&row.get::<String, _>("id"), "id")?,
        job_id: parse_uuid(&row.get::<String, _>("job_id"), "job_id")?,
        step_index: row.get::<i64, _>("step_index") as u32,
        step_name: row.get("step_name"),
        action_type: row.get("action_type"),
        input_params: serde_json::from_str(&row.get::<String, _>("input_params"))?,
        status: parse_status(&row.get::<String, _>("status"))?,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        duration_ms: row.get("duration_ms"),
        output_results: parse_json_column(row.get("output_results"))?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        can_retry: row.get("can_retry"),
        error_message: row.get("error_message"),
        error_traceback: row.get("error_traceback"),
        metrics: StepMetrics {
            records_processed: row.get("records_processed"),
            records_matched: row.get("records_matched"),
            records_failed: row.get("records_failed"),
            confidence_score: row.get("confidence_score"),
            memory_used_mb: row.get("memory_used_mb"),
        },
    })
}

fn row_to_checkpoint(row: SqliteRow) -> Result<CheckpointRow> {
    let kind = CheckpointKind::parse(&row.get::<String, _>("checkpoint_type"))
        .ok_or(PersistenceError::Corrupt("checkpoint_type"))?;
    Ok(CheckpointRow {
        id: parse_uuid(&row.get::<String, _>("id"), "id")?,
        job_id: parse_uuid(&row.get::<String, _>("job_id"), "job_id")?,
        step_index: row.get::<i64, _>("step_index") as u32,
        kind,
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        storage_path: row.get("storage_path"),
        size_bytes: row.get("size_bytes"),
        compressed: row.get("compressed"),
        is_resumable: row.get("is_resumable"),
        description: row.get("description"),
    })
}

fn row_to_log(row: SqliteRow) -> Result<LogRow> {
    let level = LogLevel::parse(&row.get::<String, _>("log_level"))
        .ok_or(PersistenceError::Corrupt("log_level"))?;
    Ok(LogRow {
        id: row.get("id"),
        job_id: parse_uuid(&row.get::<String, _>("job_id"), "job_id")?,
        step_index: row.get::<Option<i64>, _>("step_index").map(|v| v as u32),
        level,
        message: row.get("message"),
        details: parse_json_column(row.get("details"))?,
        category: row.get("category"),
        component: row.get("component"),
        created_at: row.get("created_at"),
    })
}

fn row_to_event(row: SqliteRow) -> Result<EventRow> {
    let severity = LogLevel::parse(&row.get::<String, _>("severity"))
        .ok_or(PersistenceError::Corrupt("severity"))?;
    Ok(EventRow {
        id: row.get("id"),
        job_id: parse_uuid(&row.get::<String, _>("job_id"), "job_id")?,
        event_type: row.get("event_type"),
        timestamp: row.get("timestamp"),
        severity,
        step_index: row.get::<Option<i64>, _>("step_index").map(|v| v as u32),
        step_name: row.get("step_name"),
        data: serde_json::from_str(&row.get::<String, _>("data"))?,
        message: row.get("message"),
        delivered: row.get("delivered"),
        delivery_attempts: row.get::<i64, _>("delivery_attempts") as u32,
    })
}

fn row_to_result(row: SqliteRow) -> Result<ResultRow> {
    Ok(ResultRow {
        id: parse_uuid(&row.get::<String, _>("id"), "id")?,
        job_id: parse_uuid(&row.get::<String, _>("job_id"), "job_id")?,
        step_index: row.get::<i64, _>("step_index") as u32,
        result_key: row.get("result_key"),
        storage_kind: row.get("storage_kind"),
        external_path: row.get("external_path"),
        size_bytes: row.get("size_bytes"),
        content_type: row.get("content_type"),
        encoding: row.get("encoding"),
        expires_at: row.get("expires_at"),
        accessed_count: row.get::<i64, _>("accessed_count") as u32,
        last_accessed: row.get("last_accessed"),
    })
}
