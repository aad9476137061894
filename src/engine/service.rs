//! The job submission boundary: the only public surface the engine exposes
//! directly. Transports (HTTP, WebSocket, SSE) adapt this facade.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::events::EventStream;
use crate::persistence::{
    EventRow, ExecutionOptions, JobFilter, JobMetrics, JobRow, NewJob, StepRow,
};
use crate::strategy::StrategyDoc;
use crate::types::JobStatus;

use super::ExecutionEngine;

/// Composed view of a job for status queries.
#[derive(Debug)]
pub struct StatusReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_step_index: u32,
    pub total_steps: u32,
    pub progress_percentage: f64,
    pub metrics: JobMetrics,
    pub recent_events: Vec<EventRow>,
    pub error: Option<String>,
}

/// Everything a terminal job produced.
#[derive(Debug)]
pub struct JobResults {
    pub job: JobRow,
    pub steps: Vec<StepRow>,
    pub final_results: Option<Value>,
    /// Opaque locations of externally stored result blobs.
    pub output_files: Vec<String>,
    pub metrics: JobMetrics,
}

/// Thin facade over the engine and persistence service for submitting and
/// observing jobs.
pub struct JobService {
    engine: Arc<ExecutionEngine>,
}

impl JobService {
    #[must_use]
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Create a job for the strategy and launch it in the background.
    /// Returns the job id immediately; progress flows through events.
    #[instrument(skip(self, doc, parameters, options), fields(strategy = %doc.name), err)]
    pub async fn submit(
        &self,
        doc: StrategyDoc,
        parameters: Value,
        options: ExecutionOptions,
        owner: Option<String>,
        tags: Vec<String>,
        description: Option<String>,
    ) -> Result<Uuid> {
        if doc.steps.is_empty() {
            return Err(EngineError::Validation {
                message: "strategy has no steps".to_string(),
            });
        }
        let job = self
            .engine
            .persistence()
            .create_job(NewJob {
                strategy_name: doc.name.clone(),
                strategy_doc: doc.clone(),
                parameters,
                options,
                owner,
                session_tag: None,
                tags,
                description,
            })
            .await?;
        self.engine.spawn_job(job.id, doc);
        Ok(job.id)
    }

    /// Run a job to completion in the caller's task instead of spawning.
    /// Useful for embedders that manage their own task structure.
    pub async fn submit_and_wait(
        &self,
        doc: StrategyDoc,
        parameters: Value,
        options: ExecutionOptions,
        owner: Option<String>,
        tags: Vec<String>,
        description: Option<String>,
    ) -> Result<(Uuid, super::ExecutionOutcome)> {
        if doc.steps.is_empty() {
            return Err(EngineError::Validation {
                message: "strategy has no steps".to_string(),
            });
        }
        let job = self
            .engine
            .persistence()
            .create_job(NewJob {
                strategy_name: doc.name.clone(),
                strategy_doc: doc.clone(),
                parameters,
                options,
                owner,
                session_tag: None,
                tags,
                description,
            })
            .await?;
        let outcome = self
            .engine
            .execute_strategy(job.id, doc, None, None, None)
            .await?;
        Ok((job.id, outcome))
    }

    /// Current status, metrics, and recent events for a job.
    pub async fn get(&self, job_id: Uuid) -> Result<StatusReport> {
        let persistence = self.engine.persistence();
        let job = persistence
            .get_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        let metrics = persistence.get_job_metrics(job_id).await?;
        let recent_events = persistence.get_events(job_id, None, None, 10).await?;
        Ok(StatusReport {
            job_id,
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            current_step_index: job.current_step_index,
            total_steps: job.total_steps,
            progress_percentage: job.progress_percentage,
            metrics,
            recent_events,
            error: job.error_message,
        })
    }

    pub async fn list(&self, filter: JobFilter) -> Result<Vec<JobRow>> {
        Ok(self.engine.persistence().list_jobs(filter).await?)
    }

    pub async fn pause(&self, job_id: Uuid) -> Result<bool> {
        self.engine.pause_job(job_id).await
    }

    pub async fn resume(&self, job_id: Uuid) -> Result<bool> {
        self.engine.resume_job(job_id).await
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        self.engine.cancel_job(job_id).await
    }

    /// Persisted backlog (oldest first) plus a live subscription. Intended
    /// to be adapted to SSE or WebSocket by the transport layer.
    pub async fn events(
        &self,
        job_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<EventRow>, EventStream)> {
        let stream = self.engine.subscribe();
        let mut backlog = self
            .engine
            .persistence()
            .get_events(job_id, since, None, 1000)
            .await?;
        backlog.reverse();
        Ok((backlog, stream))
    }

    /// Results of a terminal job: steps, final context data, output file
    /// locations, and aggregate metrics.
    pub async fn results(&self, job_id: Uuid) -> Result<JobResults> {
        let persistence = self.engine.persistence();
        let job = persistence
            .get_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if !job.status.is_terminal() {
            return Err(EngineError::Validation {
                message: format!("job {job_id} is not terminal (status {})", job.status),
            });
        }
        let steps = persistence.list_steps(job_id).await?;
        let metrics = persistence.get_job_metrics(job_id).await?;
        let output_files = Self::external_paths(persistence, job_id).await?;
        Ok(JobResults {
            final_results: job.final_results.clone(),
            job,
            steps,
            output_files,
            metrics,
        })
    }

    /// Restore the execution context of the latest resumable checkpoint,
    /// for inspection or external resumption.
    pub async fn latest_context(&self, job_id: Uuid) -> Result<Option<ExecutionContext>> {
        let persistence = self.engine.persistence();
        let Some(checkpoint) = persistence.get_latest_checkpoint(job_id).await? else {
            return Ok(None);
        };
        let restored =
            persistence
                .restore_checkpoint(checkpoint.id)
                .await
                .map_err(|e| EngineError::Resume {
                    message: e.to_string(),
                })?;
        Ok(Some(restored.context))
    }

    async fn external_paths(
        persistence: &Arc<crate::persistence::PersistenceService>,
        job_id: Uuid,
    ) -> Result<Vec<String>> {
        use sqlx::Row;
        let rows = sqlx::query(
            "SELECT external_path FROM result_storage \
             WHERE job_id = ?1 AND external_path IS NOT NULL \
             ORDER BY step_index",
        )
        .bind(job_id.to_string())
        .fetch_all(persistence.pool())
        .await
        .map_err(crate::persistence::PersistenceError::from)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.get::<Option<String>, _>("external_path"))
            .collect())
    }
}
