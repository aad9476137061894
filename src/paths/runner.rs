//! The batched, concurrent path runner.
//!
//! Batches run as sibling tasks under a semaphore; within a batch, steps
//! run in sequence against the union of the batch's working identifiers,
//! while attribution back to each original input is tracked per step.
//! Failures never escape the public API as errors: a failing batch yields
//! `ExecutionError`-shaped results and the strategy engine decides whether
//! to retry.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::cache::{derive_confidence, determine_mapping_source};
use crate::types::PathStatus;

use super::{ClientProvider, PathResult, PathView, StepProvenance};

/// Tunables for one path execution.
#[derive(Clone, Debug)]
pub struct PathRunOptions {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    /// Skip the path outright when its hop count exceeds this.
    pub max_hop_count: Option<u32>,
    /// Successful results below this confidence are filtered out.
    pub min_confidence: f64,
    pub cancel: CancellationToken,
}

impl Default for PathRunOptions {
    fn default() -> Self {
        Self {
            batch_size: 250,
            max_concurrent_batches: 5,
            max_hop_count: None,
            min_confidence: 0.0,
            cancel: CancellationToken::new(),
        }
    }
}

/// Timing and counting facts surfaced to the caller.
#[derive(Clone, Debug, Default)]
pub struct PathMetrics {
    pub total_ms: i64,
    pub batch_timings_ms: Vec<i64>,
    pub success_count: usize,
    pub error_count: usize,
    pub filtered_count: usize,
    pub missing_count: usize,
}

pub struct PathRunner {
    provider: Arc<dyn ClientProvider>,
}

impl PathRunner {
    #[must_use]
    pub fn new(provider: Arc<dyn ClientProvider>) -> Self {
        Self { provider }
    }

    /// Execute `view` for `ids`, returning one result per distinct input id
    /// plus run metrics. Never returns an error; per-batch failures are
    /// encoded in the results.
    #[instrument(skip(self, view, ids, opts), fields(path = view.name(), inputs = ids.len()))]
    pub async fn execute_path(
        &self,
        view: &PathView,
        ids: &[String],
        source_type: &str,
        target_type: &str,
        opts: &PathRunOptions,
    ) -> (FxHashMap<String, PathResult>, PathMetrics) {
        let started = Instant::now();
        let mut metrics = PathMetrics::default();

        // Early skip on hop bound: the path is not attempted at all.
        if let Some(max_hops) = opts.max_hop_count {
            if view.hop_count() > max_hops {
                let results = ids
                    .iter()
                    .map(|id| {
                        (
                            id.clone(),
                            skipped_result(view, id, view.hop_count(), max_hops),
                        )
                    })
                    .collect();
                metrics.total_ms = started.elapsed().as_millis() as i64;
                return (results, metrics);
            }
        }

        // Deduplicate preserving first-seen order.
        let mut seen = FxHashSet::default();
        let unique: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();

        let batch_size = opts.batch_size.max(1);
        let batches: Vec<Vec<String>> = unique
            .chunks(batch_size)
            .map(<[String]>::to_vec)
            .collect();
        let semaphore = Arc::new(Semaphore::new(opts.max_concurrent_batches.max(1)));

        let tasks = batches.into_iter().map(|batch| {
            let semaphore = Arc::clone(&semaphore);
            let cancel = opts.cancel.clone();
            async move {
                let _permit = semaphore.acquire().await;
                let batch_started = Instant::now();
                let results = self
                    .run_batch(view, &batch, source_type, target_type, &cancel)
                    .await;
                (results, batch_started.elapsed().as_millis() as i64)
            }
        });

        let mut combined: FxHashMap<String, PathResult> = FxHashMap::default();
        for (batch_results, elapsed) in join_all(tasks).await {
            metrics.batch_timings_ms.push(elapsed);
            combined.extend(batch_results);
        }

        // Apply the confidence floor, then fill in ids that produced nothing.
        for result in combined.values_mut() {
            if result.status == PathStatus::Success
                && result.confidence_score < opts.min_confidence
            {
                metrics.filtered_count += 1;
                result.status = PathStatus::NoMappingFound;
                result.message = format!(
                    "Mapping filtered: confidence {} below threshold {}",
                    result.confidence_score, opts.min_confidence
                );
                result.target_identifiers = None;
                result.mapped_value = None;
            }
        }
        for id in ids {
            if !combined.contains_key(id) {
                metrics.missing_count += 1;
                combined.insert(id.clone(), no_mapping_result(view, id));
            }
        }

        metrics.success_count = combined
            .values()
            .filter(|r| r.status == PathStatus::Success)
            .count();
        metrics.error_count = combined
            .values()
            .filter(|r| matches!(r.status, PathStatus::ExecutionError | PathStatus::Error))
            .count();
        metrics.total_ms = started.elapsed().as_millis() as i64;

        tracing::debug!(
            path = view.name(),
            success = metrics.success_count,
            errors = metrics.error_count,
            filtered = metrics.filtered_count,
            elapsed_ms = metrics.total_ms,
            "path execution complete"
        );

        (combined, metrics)
    }

    /// Run all steps for one batch, tracking attribution per original id.
    async fn run_batch(
        &self,
        view: &PathView,
        batch: &[String],
        source_type: &str,
        target_type: &str,
        cancel: &CancellationToken,
    ) -> FxHashMap<String, PathResult> {
        let steps = view.steps_in_order();

        // Per-original-id execution progress. The frontier is the set of
        // identifiers currently attributed to that original input.
        struct Progress {
            frontier: Vec<String>,
            provenance: Vec<StepProvenance>,
            final_ids: Vec<String>,
        }
        let mut progress: FxHashMap<String, Progress> = batch
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    Progress {
                        frontier: vec![id.clone()],
                        provenance: Vec::new(),
                        final_ids: Vec::new(),
                    },
                )
            })
            .collect();

        let last_index = steps.len().saturating_sub(1);
        for (step_index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return batch
                    .iter()
                    .map(|id| (id.clone(), error_result(view, id, "path execution cancelled")))
                    .collect();
            }

            // Union of all live frontiers, deduplicated.
            let mut union_seen = FxHashSet::default();
            let working: Vec<String> = progress
                .values()
                .flat_map(|p| p.frontier.iter())
                .filter(|id| union_seen.insert((*id).clone()))
                .cloned()
                .collect();
            if working.is_empty() {
                break;
            }

            let Some(client) = self.provider.client_for(step) else {
                let message = format!("no client for resource {}", step.resource_name);
                return batch
                    .iter()
                    .map(|id| (id.clone(), error_result(view, id, &message)))
                    .collect();
            };

            let step_started = Instant::now();
            let step_results = match client.map_identifiers(&working).await {
                Ok(results) => results,
                Err(e) => {
                    // A step failure poisons the whole batch; the runner
                    // reports it in the results rather than propagating.
                    tracing::error!(
                        path = view.name(),
                        step = %step.name,
                        error = %e,
                        "step client failed"
                    );
                    return batch
                        .iter()
                        .map(|id| (id.clone(), error_result(view, id, &e.message)))
                        .collect();
                }
            };
            let step_elapsed = step_started.elapsed().as_millis() as i64;

            for prog in progress.values_mut() {
                let mut mapped: Vec<String> = Vec::new();
                let mut contributing: Vec<String> = Vec::new();
                let mut resolved_historical = false;
                for frontier_id in &prog.frontier {
                    if let Some(outcome) = step_results.get(frontier_id) {
                        if let Some(targets) = &outcome.targets {
                            if !targets.is_empty() {
                                contributing.push(frontier_id.clone());
                                resolved_historical |= outcome.resolved_historical;
                                for target in targets {
                                    if !mapped.contains(target) {
                                        mapped.push(target.clone());
                                    }
                                }
                            }
                        }
                    }
                }

                if mapped.is_empty() {
                    prog.frontier.clear();
                    continue;
                }
                prog.provenance.push(StepProvenance {
                    step_id: step.id,
                    step_name: step.name.clone(),
                    resource_id: step.resource_id,
                    resource_name: step.resource_name.clone(),
                    input_ids: contributing,
                    output_ids: mapped.clone(),
                    resolved_historical,
                    duration_ms: step_elapsed,
                });
                if step_index == last_index {
                    prog.final_ids = mapped.clone();
                }
                prog.frontier = mapped;
            }
        }

        let hop_count = steps.len() as u32;
        let resources = view.step_resources();
        let mut results = FxHashMap::default();
        for (original, prog) in progress {
            if prog.final_ids.is_empty() {
                continue;
            }
            let confidence =
                derive_confidence(None, Some(hop_count), view.is_reverse(), &resources);
            let resolved_historical = prog.provenance.iter().any(|p| p.resolved_historical);
            let details = PathResult::build_path_details(
                view,
                Some(&serde_json::json!({
                    "resolved_historical": resolved_historical,
                    "confidence_score": confidence,
                    "source_ontology": source_type,
                    "target_ontology": target_type,
                })),
            );
            results.insert(
                original.clone(),
                PathResult {
                    source_identifier: original,
                    mapped_value: prog.final_ids.first().cloned(),
                    target_identifiers: Some(prog.final_ids),
                    status: PathStatus::Success,
                    message: format!("Successfully mapped via path: {}", view.name()),
                    confidence_score: confidence,
                    hop_count: Some(hop_count),
                    mapping_direction: view.direction(),
                    mapping_path_details: Some(details),
                    mapping_source: Some(determine_mapping_source(&resources)),
                    error_details: None,
                    provenance: prog.provenance,
                    cached: false,
                    explicit_confidence: None,
                    additional_metadata: None,
                },
            );
        }
        results
    }
}

fn base_result(view: &PathView, id: &str, status: PathStatus, message: String) -> PathResult {
    PathResult {
        source_identifier: id.to_string(),
        target_identifiers: None,
        mapped_value: None,
        status,
        message,
        confidence_score: 0.0,
        hop_count: Some(view.hop_count()),
        mapping_direction: view.direction(),
        mapping_path_details: None,
        mapping_source: None,
        error_details: None,
        provenance: Vec::new(),
        cached: false,
        explicit_confidence: None,
        additional_metadata: None,
    }
}

fn skipped_result(view: &PathView, id: &str, hops: u32, max_hops: u32) -> PathResult {
    base_result(
        view,
        id,
        PathStatus::Skipped,
        format!("Path skipped (hop count {hops} exceeds max_hop_count {max_hops})"),
    )
}

fn no_mapping_result(view: &PathView, id: &str) -> PathResult {
    base_result(
        view,
        id,
        PathStatus::NoMappingFound,
        format!("No mapping found via path: {}", view.name()),
    )
}

fn error_result(view: &PathView, id: &str, message: &str) -> PathResult {
    let mut result = base_result(
        view,
        id,
        PathStatus::ExecutionError,
        format!("Error during path execution: {message}"),
    );
    result.error_details = Some(serde_json::json!({"error_message": message}));
    result
}
