//! The strategy execution engine.
//!
//! One engine instance serves many concurrent jobs. Each job runs in its
//! own task holding a cancellation token derived from the engine's
//! shutdown token; steps execute sequentially within a job, and every
//! durable effect goes through the persistence service so a job can be
//! resumed from its latest checkpoint after a crash, pause, or restart.

pub mod service;

pub use service::{JobResults, JobService, StatusReport};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as ParkingMutex;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::actions::{ActionError, ActionRegistry, StepOutput};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::events::{EventBus, EventKind, JobEvent};
use crate::persistence::{
    JobStatusUpdate, PersistenceService, StepMetrics,
};
use crate::resources::ResourceManager;
use crate::strategy::{Condition, ErrorAction, StrategyDoc, StrategyStep};
use crate::types::{CheckpointKind, JobStatus, LogLevel};

/// Result of one `execute_strategy` invocation.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub results: Option<Value>,
    pub error: Option<String>,
    pub context: ExecutionContext,
}

/// How the step loop ended.
enum LoopExit {
    Completed,
    Cancelled,
    Paused,
    Failed { step_index: u32, message: String },
}

struct JobHandle {
    cancel: CancellationToken,
}

pub struct ExecutionEngine {
    persistence: Arc<PersistenceService>,
    registry: Arc<ActionRegistry>,
    resources: Arc<ResourceManager>,
    bus: EventBus,
    shutdown: CancellationToken,
    jobs: ParkingMutex<FxHashMap<Uuid, JobHandle>>,
}

impl ExecutionEngine {
    /// Wire up an engine. The bus starts listening immediately and the
    /// persistence service forwards every persisted event onto it.
    #[must_use]
    pub fn new(
        persistence: Arc<PersistenceService>,
        registry: Arc<ActionRegistry>,
        resources: Arc<ResourceManager>,
        bus: EventBus,
    ) -> Arc<Self> {
        bus.listen_for_events();
        persistence.set_emitter(bus.get_emitter());
        Arc::new(Self {
            persistence,
            registry,
            resources,
            bus,
            shutdown: CancellationToken::new(),
            jobs: ParkingMutex::new(FxHashMap::default()),
        })
    }

    #[must_use]
    pub fn persistence(&self) -> &Arc<PersistenceService> {
        &self.persistence
    }

    #[must_use]
    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Subscribe to the live event stream.
    #[must_use]
    pub fn subscribe(&self) -> crate::events::EventStream {
        self.bus.subscribe()
    }

    /// Fire the engine-wide shutdown token; every job task observes it.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn register_job(&self, job_id: Uuid) -> CancellationToken {
        let cancel = self.shutdown.child_token();
        self.jobs.lock().insert(
            job_id,
            JobHandle {
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    fn deregister_job(&self, job_id: Uuid) {
        self.jobs.lock().remove(&job_id);
    }

    fn cancel_token_for(&self, job_id: Uuid) -> Option<CancellationToken> {
        self.jobs.lock().get(&job_id).map(|h| h.cancel.clone())
    }

    /// Launch a job task in the background. The caller observes progress
    /// through events and job status.
    pub fn spawn_job(self: &Arc<Self>, job_id: Uuid, doc: StrategyDoc) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _ = engine.execute_strategy(job_id, doc, None, None, None).await;
        });
    }

    /// Execute a strategy for an existing job, optionally resuming from a
    /// step index or a specific checkpoint.
    #[instrument(skip(self, doc, context), err)]
    pub async fn execute_strategy(
        self: &Arc<Self>,
        job_id: Uuid,
        doc: StrategyDoc,
        context: Option<ExecutionContext>,
        resume_from_step: Option<u32>,
        resume_from_checkpoint: Option<Uuid>,
    ) -> Result<ExecutionOutcome> {
        let job = self
            .persistence
            .get_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        let cancel = self.register_job(job_id);
        let outcome = self
            .execute_inner(job_id, &doc, &job.options, context, resume_from_step, resume_from_checkpoint, cancel)
            .await;
        self.deregister_job(job_id);

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Infrastructure failure: make sure the job record reflects
                // it before surfacing the error.
                let message = e.to_string();
                let _ = self
                    .persistence
                    .update_job_status(
                        job_id,
                        JobStatus::Failed,
                        JobStatusUpdate {
                            error_message: Some(message.clone()),
                            ..Default::default()
                        },
                    )
                    .await;
                let _ = self
                    .persistence
                    .emit_event(
                        JobEvent::new(job_id, EventKind::Error, serde_json::json!({"error": message}))
                            .with_severity(LogLevel::Error),
                    )
                    .await;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_inner(
        self: &Arc<Self>,
        job_id: Uuid,
        doc: &StrategyDoc,
        options: &crate::persistence::ExecutionOptions,
        context: Option<ExecutionContext>,
        resume_from_step: Option<u32>,
        resume_from_checkpoint: Option<Uuid>,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome> {
        // Resolve start point and context per the resume rules.
        let (context, start_index) = self
            .resolve_start(job_id, doc, context, resume_from_step, resume_from_checkpoint)
            .await?;
        let ctx = Arc::new(AsyncMutex::new(context));

        // Resource gating happens before the job is marked Running.
        if let Err(e) = self.gate_resources(job_id, doc).await {
            let message = e.to_string();
            self.persistence
                .update_job_status(
                    job_id,
                    JobStatus::Failed,
                    JobStatusUpdate {
                        error_message: Some(message.clone()),
                        ..Default::default()
                    },
                )
                .await?;
            let context = ctx.lock().await.clone();
            return Ok(ExecutionOutcome {
                success: false,
                results: None,
                error: Some(message),
                context,
            });
        }

        self.persistence
            .update_job_status(job_id, JobStatus::Running, JobStatusUpdate::default())
            .await?;

        let timeout = Duration::from_secs(options.timeout_seconds.max(1));
        let loop_result = tokio::time::timeout(
            timeout,
            self.run_steps(job_id, doc, options, &ctx, start_index, &cancel),
        )
        .await;

        let exit = match loop_result {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => return Err(e),
            Err(_elapsed) => {
                cancel.cancel();
                let message = format!("job timed out after {}s", options.timeout_seconds);
                self.persistence
                    .update_job_status(
                        job_id,
                        JobStatus::Failed,
                        JobStatusUpdate {
                            error_message: Some(message.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                let context = ctx.lock().await.clone();
                return Ok(ExecutionOutcome {
                    success: false,
                    results: None,
                    error: Some(message),
                    context,
                });
            }
        };

        let context = ctx.lock().await.clone();
        match exit {
            LoopExit::Completed => {
                let completed_steps = context
                    .step_results
                    .iter()
                    .filter(|r| r.success)
                    .count();
                let final_results = serde_json::json!({
                    "total_steps": doc.total_steps(),
                    "completed_steps": completed_steps,
                    "context": context.custom_action_data,
                });
                let metrics = self.persistence.get_job_metrics(job_id).await?;
                self.persistence
                    .update_job_status(
                        job_id,
                        JobStatus::Completed,
                        JobStatusUpdate {
                            progress_percentage: Some(100.0),
                            final_results: Some(final_results.clone()),
                            memory_mb_peak: metrics.memory_mb_peak,
                            ..Default::default()
                        },
                    )
                    .await?;
                self.persistence
                    .emit_event(JobEvent::new(
                        job_id,
                        EventKind::Complete,
                        serde_json::json!({"total_steps": doc.total_steps()}),
                    ))
                    .await?;
                Ok(ExecutionOutcome {
                    success: true,
                    results: Some(final_results),
                    error: None,
                    context,
                })
            }
            LoopExit::Cancelled => Ok(ExecutionOutcome {
                success: false,
                results: None,
                error: Some("job cancelled".to_string()),
                context,
            }),
            LoopExit::Paused => Ok(ExecutionOutcome {
                success: false,
                results: None,
                error: Some("job paused".to_string()),
                context,
            }),
            LoopExit::Failed {
                step_index,
                message,
            } => {
                self.persistence
                    .create_checkpoint(
                        job_id,
                        step_index,
                        &context,
                        CheckpointKind::PreError,
                        Some("State at failure"),
                    )
                    .await?;
                self.persistence
                    .update_job_status(
                        job_id,
                        JobStatus::Failed,
                        JobStatusUpdate {
                            error_message: Some(message.clone()),
                            error_details: Some(serde_json::json!({
                                "step": step_index,
                                "step_name": doc.steps.get(step_index as usize).map(|s| s.name.clone()),
                            })),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(ExecutionOutcome {
                    success: false,
                    results: None,
                    error: Some(message),
                    context,
                })
            }
        }
    }

    /// Restore context and pick the starting step index.
    async fn resolve_start(
        &self,
        job_id: Uuid,
        doc: &StrategyDoc,
        context: Option<ExecutionContext>,
        resume_from_step: Option<u32>,
        resume_from_checkpoint: Option<Uuid>,
    ) -> Result<(ExecutionContext, u32)> {
        if let Some(checkpoint_id) = resume_from_checkpoint {
            let restored = self
                .persistence
                .restore_checkpoint(checkpoint_id)
                .await
                .map_err(|e| EngineError::Resume {
                    message: e.to_string(),
                })?;
            tracing::info!(
                %job_id,
                step = restored.step_index + 1,
                "resuming from checkpoint"
            );
            return Ok((restored.context, restored.step_index + 1));
        }

        if let Some(target) = resume_from_step {
            if let Some(checkpoint) = self
                .persistence
                .find_resume_checkpoint(job_id, target)
                .await?
            {
                let restored = self
                    .persistence
                    .restore_checkpoint(checkpoint.id)
                    .await
                    .map_err(|e| EngineError::Resume {
                        message: e.to_string(),
                    })?;
                tracing::info!(%job_id, checkpoint_step = restored.step_index, "loaded checkpoint for resume");
                return Ok((restored.context, target));
            }
            return Ok((
                context.unwrap_or_else(|| {
                    ExecutionContext::seeded(&job_id.to_string(), &doc.name)
                }),
                target,
            ));
        }

        Ok((
            context.unwrap_or_else(|| ExecutionContext::seeded(&job_id.to_string(), &doc.name)),
            0,
        ))
    }

    /// Verify (and optionally auto-start) every resource the strategy
    /// requires. Degraded is permitted with a warning; anything else fails
    /// the job with a ResourceUnavailable error.
    async fn gate_resources(&self, job_id: Uuid, doc: &StrategyDoc) -> Result<()> {
        use crate::resources::{ResourceError, ResourceStatus};

        for name in self.resources.required_resources_for(doc) {
            let mut status = self
                .resources
                .check(&name)
                .await
                .map_err(EngineError::Resource)?;
            if !status.permits_execution() {
                // start() is idempotent and a no-op for non-startable types.
                let _ = self.resources.start(&name).await;
                status = self
                    .resources
                    .check(&name)
                    .await
                    .map_err(EngineError::Resource)?;
            }
            if status == ResourceStatus::Degraded {
                self.persistence
                    .log(
                        job_id,
                        LogLevel::Warning,
                        &format!("required resource {name} is degraded"),
                        None,
                        None,
                        Some("resources"),
                        Some("engine"),
                    )
                    .await?;
            } else if !status.permits_execution() {
                return Err(EngineError::Resource(ResourceError::Unavailable {
                    name,
                    message: format!("status {status} after auto-start attempt"),
                }));
            }
        }
        Ok(())
    }

    /// The sequential step loop.
    async fn run_steps(
        self: &Arc<Self>,
        job_id: Uuid,
        doc: &StrategyDoc,
        options: &crate::persistence::ExecutionOptions,
        ctx: &Arc<AsyncMutex<ExecutionContext>>,
        start_index: u32,
        cancel: &CancellationToken,
    ) -> Result<LoopExit> {
        let policy = options
            .checkpoint_policy
            .clone()
            .or_else(|| doc.checkpoint_policy.clone())
            .unwrap_or_default();
        let total = doc.total_steps();

        for (i, step) in doc.steps.iter().enumerate().skip(start_index as usize) {
            let i = i as u32;

            // Observe cancellation/pause between steps.
            if let Some(exit) = self.interruption_state(job_id, ctx, i).await? {
                return Ok(exit);
            }

            // Conditions: the dialect is closed; unsupported predicates are
            // fail-open with a warning.
            if let Some(raw) = &step.condition {
                let condition = Condition::parse(raw);
                let (outcome, unsupported) = {
                    let guard = ctx.lock().await;
                    condition.evaluate(&guard)
                };
                if unsupported {
                    self.persistence
                        .log(
                            job_id,
                            LogLevel::Warning,
                            &format!("unsupported condition `{raw}` evaluated as true"),
                            Some(i),
                            None,
                            Some("conditions"),
                            Some("engine"),
                        )
                        .await?;
                }
                if !outcome {
                    self.skip_step(job_id, i, step, ctx).await?;
                    self.update_progress(job_id, i + 1, total).await?;
                    continue;
                }
            }

            if policy.wants_before(step) {
                let guard = ctx.lock().await;
                self.persistence
                    .create_checkpoint(
                        job_id,
                        i,
                        &guard,
                        CheckpointKind::BeforeStep,
                        Some(&format!("Before {}", step.name)),
                    )
                    .await?;
            }

            self.persistence
                .record_step_start(job_id, i, &step.name, &step.action.action_type, &step.action.params)
                .await?;

            let attempt_result = self
                .run_action_with_retry(job_id, i, step, ctx, cancel)
                .await?;

            match attempt_result {
                AttemptResult::Output(output, retries) => {
                    {
                        let mut guard = ctx.lock().await;
                        self.attach_output(job_id, i, &step.name, &output, &mut guard)
                            .await?;
                    }
                    let metrics = StepMetrics {
                        records_processed: output.records_processed,
                        records_matched: output.records_matched,
                        records_failed: output.records_failed,
                        confidence_score: output.confidence_score,
                        memory_used_mb: output.memory_used_mb,
                    };
                    self.persistence
                        .record_step_completion(job_id, i, &output.to_value(), metrics)
                        .await?;
                    if retries > 0 {
                        self.persistence
                            .set_step_retry_count(job_id, i, retries)
                            .await?;
                        let job_retries = self
                            .persistence
                            .get_job(job_id)
                            .await?
                            .map_or(retries, |j| j.retry_count + retries);
                        let _ = self
                            .persistence
                            .update_job_status(
                                job_id,
                                JobStatus::Running,
                                JobStatusUpdate {
                                    retry_count: Some(job_retries),
                                    ..Default::default()
                                },
                            )
                            .await;
                    }
                }
                AttemptResult::Interrupted => {
                    self.persistence
                        .record_step_failure(
                            job_id,
                            i,
                            "step interrupted by cancellation",
                            None,
                            0,
                            true,
                        )
                        .await?;
                    return self
                        .interruption_state(job_id, ctx, i)
                        .await
                        .map(|exit| exit.unwrap_or(LoopExit::Cancelled));
                }
                AttemptResult::Failed {
                    message,
                    retries,
                    permanent,
                } => {
                    {
                        let mut guard = ctx.lock().await;
                        guard.record_step(&step.name, false, Value::Null, Some(message.clone()));
                    }
                    self.persistence
                        .record_step_failure(job_id, i, &message, None, retries, !permanent)
                        .await?;
                    if step.is_required {
                        return Ok(LoopExit::Failed {
                            step_index: i,
                            message,
                        });
                    }
                    self.persistence
                        .log(
                            job_id,
                            LogLevel::Warning,
                            &format!("optional step {} failed, continuing", step.name),
                            Some(i),
                            None,
                            None,
                            Some("engine"),
                        )
                        .await?;
                    self.update_progress(job_id, i + 1, total).await?;
                    continue;
                }
            }

            if policy.wants_after(step) {
                let guard = ctx.lock().await;
                self.persistence
                    .create_checkpoint(
                        job_id,
                        i,
                        &guard,
                        CheckpointKind::AfterStep,
                        Some(&format!("After {}", step.name)),
                    )
                    .await?;
            }

            self.update_progress(job_id, i + 1, total).await?;
        }

        Ok(LoopExit::Completed)
    }

    /// Re-read job status; on Cancelled/Paused return the matching exit.
    /// A pause writes a pause-point checkpoint if none covers the current
    /// step yet.
    async fn interruption_state(
        &self,
        job_id: Uuid,
        ctx: &Arc<AsyncMutex<ExecutionContext>>,
        step_index: u32,
    ) -> Result<Option<LoopExit>> {
        let Some(job) = self.persistence.get_job(job_id).await? else {
            return Ok(Some(LoopExit::Cancelled));
        };
        match job.status {
            JobStatus::Cancelled => Ok(Some(LoopExit::Cancelled)),
            JobStatus::Paused => {
                // A checkpoint at step_index - 1 resumes exactly at the
                // interrupted step. If none is fresh enough, write one now;
                // a pause before any completed step leaves nothing to
                // checkpoint and resume will restart from scratch.
                if step_index > 0 {
                    let covered = self
                        .persistence
                        .get_latest_checkpoint(job_id)
                        .await?
                        .is_some_and(|cp| {
                            cp.step_index == step_index - 1
                                && matches!(
                                    cp.kind,
                                    CheckpointKind::AfterStep
                                        | CheckpointKind::PausePoint
                                        | CheckpointKind::Automatic
                                )
                        });
                    if !covered {
                        let guard = ctx.lock().await;
                        self.persistence
                            .create_checkpoint(
                                job_id,
                                step_index - 1,
                                &guard,
                                CheckpointKind::PausePoint,
                                Some("Pause point"),
                            )
                            .await?;
                    }
                }
                Ok(Some(LoopExit::Paused))
            }
            _ => Ok(None),
        }
    }

    /// Record a condition-skipped step so recorded step indexes stay a
    /// contiguous prefix.
    async fn skip_step(
        &self,
        job_id: Uuid,
        step_index: u32,
        step: &StrategyStep,
        ctx: &Arc<AsyncMutex<ExecutionContext>>,
    ) -> Result<()> {
        self.persistence
            .record_step_start(job_id, step_index, &step.name, &step.action.action_type, &step.action.params)
            .await?;
        let skipped = serde_json::json!({"success": true, "skipped": true});
        self.persistence
            .record_step_completion(job_id, step_index, &skipped, StepMetrics::default())
            .await?;
        let mut guard = ctx.lock().await;
        guard.record_step(&step.name, true, skipped, None);
        Ok(())
    }

    /// Invoke the step's action under its retry policy.
    async fn run_action_with_retry(
        &self,
        job_id: Uuid,
        step_index: u32,
        step: &StrategyStep,
        ctx: &Arc<AsyncMutex<ExecutionContext>>,
        cancel: &CancellationToken,
    ) -> Result<AttemptResult> {
        let action_type = &step.action.action_type;
        let Some(descriptor) = self.registry.get(action_type) else {
            return Ok(AttemptResult::Failed {
                message: format!("unknown action type: {action_type}"),
                retries: 0,
                permanent: true,
            });
        };

        // Param validation failures are permanent, never retried.
        if let Some(schema) = &descriptor.schema {
            if let Err(e) = schema.validate(action_type, &step.action.params) {
                return Ok(AttemptResult::Failed {
                    message: e.to_string(),
                    retries: 0,
                    permanent: true,
                });
            }
        }

        // Absent on_error means no retry, regardless of any global flag.
        let (max_attempts, delay) = match &step.on_error {
            Some(on_error) if on_error.action == ErrorAction::Retry => {
                (on_error.max_attempts.max(1), on_error.delay)
            }
            _ => (1, None),
        };

        let mut attempt: u32 = 0;
        loop {
            let result = {
                let mut guard = ctx.lock().await;
                tokio::select! {
                    () = cancel.cancelled() => Err(ActionError::Cancelled),
                    result = descriptor
                        .action
                        .execute(&step.action.params, &mut guard, cancel) => result,
                }
            };

            match result {
                Ok(output) => return Ok(AttemptResult::Output(output, attempt)),
                Err(ActionError::Cancelled) => return Ok(AttemptResult::Interrupted),
                Err(e) => {
                    let retryable = e.is_retryable();
                    attempt += 1;
                    if retryable && attempt < max_attempts {
                        let sleep_secs = delay.unwrap_or_else(|| backoff_seconds(attempt));
                        self.persistence
                            .log(
                                job_id,
                                LogLevel::Warning,
                                &format!(
                                    "step {} attempt {attempt}/{max_attempts} failed: {e}; retrying in {sleep_secs:.2}s",
                                    step.name
                                ),
                                Some(step_index),
                                None,
                                Some("retry"),
                                Some("engine"),
                            )
                            .await?;
                        tokio::select! {
                            () = cancel.cancelled() => return Ok(AttemptResult::Interrupted),
                            () = tokio::time::sleep(Duration::from_secs_f64(sleep_secs)) => {}
                        }
                        continue;
                    }
                    return Ok(AttemptResult::Failed {
                        message: e.to_string(),
                        retries: attempt.saturating_sub(1),
                        permanent: !retryable,
                    });
                }
            }
        }
    }

    /// Attach a step's output to the context, spilling oversize payloads to
    /// result storage and keeping only a reference plus summary inline.
    async fn attach_output(
        &self,
        job_id: Uuid,
        step_index: u32,
        step_name: &str,
        output: &StepOutput,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        let value = output.to_value();
        let serialized_len = value.to_string().len();
        if serialized_len > self.persistence.compress_threshold() {
            self.persistence
                .store_result(job_id, step_index, "step_output", &value, 30)
                .await?;
            ctx.insert_custom(
                format!("step_{step_index}_output_ref"),
                Value::String(format!("stored:{job_id}:{step_index}:step_output")),
            );
            ctx.insert_custom(
                format!("step_{step_index}_output_summary"),
                serde_json::json!({
                    "stored": true,
                    "size_bytes": serialized_len,
                    "records": output.records_processed.unwrap_or(0),
                }),
            );
            ctx.record_step(
                step_name,
                output.success,
                serde_json::json!({"stored": true, "size_bytes": serialized_len}),
                None,
            );
        } else {
            ctx.insert_custom(format!("step_{step_index}_output"), value.clone());
            ctx.record_step(step_name, output.success, value, None);
        }
        Ok(())
    }

    async fn update_progress(&self, job_id: Uuid, next_index: u32, total: u32) -> Result<()> {
        // A pause or cancel that landed mid-step must not be flipped back
        // to Running by a progress write.
        let still_running = self
            .persistence
            .get_job(job_id)
            .await?
            .is_some_and(|j| j.status == JobStatus::Running);
        if !still_running {
            return Ok(());
        }
        let progress = if total > 0 {
            f64::from(next_index) / f64::from(total) * 100.0
        } else {
            100.0
        };
        self.persistence
            .update_job_status(
                job_id,
                JobStatus::Running,
                JobStatusUpdate {
                    current_step_index: Some(next_index),
                    progress_percentage: Some(progress),
                    ..Default::default()
                },
            )
            .await?;
        self.persistence
            .emit_event(JobEvent::new(
                job_id,
                EventKind::Progress,
                serde_json::json!({"current_step": next_index, "total_steps": total, "percentage": progress}),
            ))
            .await?;
        Ok(())
    }

    /* ---------- Control operations ---------- */

    /// Pause a running job: transition to Paused and interrupt the current
    /// step cooperatively. The job task writes a pause-point checkpoint on
    /// its way out.
    #[instrument(skip(self))]
    pub async fn pause_job(&self, job_id: Uuid) -> Result<bool> {
        let Some(job) = self.persistence.get_job(job_id).await? else {
            return Ok(false);
        };
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        self.persistence
            .update_job_status(job_id, JobStatus::Paused, JobStatusUpdate::default())
            .await?;
        if let Some(token) = self.cancel_token_for(job_id) {
            token.cancel();
        }
        Ok(true)
    }

    /// Resume a paused job from its latest resumable checkpoint.
    #[instrument(skip(self))]
    pub async fn resume_job(self: &Arc<Self>, job_id: Uuid) -> Result<bool> {
        let Some(job) = self.persistence.get_job(job_id).await? else {
            return Ok(false);
        };
        if job.status != JobStatus::Paused {
            return Ok(false);
        }
        let Some(checkpoint) = self.persistence.get_latest_checkpoint(job_id).await? else {
            tracing::error!(%job_id, "no checkpoint available for resume");
            return Ok(false);
        };
        let doc: StrategyDoc = serde_json::from_value(job.strategy_doc)
            .map_err(|e| EngineError::Validation {
                message: format!("stored strategy document unreadable: {e}"),
            })?;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _ = engine
                .execute_strategy(job_id, doc, None, None, Some(checkpoint.id))
                .await;
        });
        Ok(true)
    }

    /// Cancel a running or paused job.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<bool> {
        let Some(job) = self.persistence.get_job(job_id).await? else {
            return Ok(false);
        };
        if job.status.is_terminal() {
            return Ok(false);
        }
        self.persistence
            .update_job_status(job_id, JobStatus::Cancelled, JobStatusUpdate::default())
            .await?;
        if let Some(token) = self.cancel_token_for(job_id) {
            token.cancel();
        }
        Ok(true)
    }
}

enum AttemptResult {
    Output(StepOutput, u32),
    Interrupted,
    Failed {
        message: String,
        retries: u32,
        permanent: bool,
    },
}

/// Exponential back-off with ±10% jitter.
fn backoff_seconds(attempt: u32) -> f64 {
    let base = 2_f64.powi(attempt.min(10) as i32);
    let jitter = rand::rng().random_range(0.9..1.1);
    base * jitter
}
