//! Mapping paths and the batched, concurrent path runner.
//!
//! A path is an ordered list of steps, each backed by a mapping resource
//! that translates identifiers from one ontology into another. The runner
//! executes one path for a batch of identifiers, preserving attribution:
//! when a single source id fans out into several intermediates, every final
//! target is still credited back to the original source.

pub mod runner;

pub use runner::{PathMetrics, PathRunOptions, PathRunner};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cache::StepResourceInfo;
use crate::types::{MappingDirection, MappingSource, PathStatus};

/// An ordered mapping path, as loaded from configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MappingPath {
    pub id: i64,
    pub name: String,
    pub steps: Vec<PathStep>,
}

/// One step of a mapping path.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathStep {
    pub id: i64,
    pub name: String,
    pub resource_id: i64,
    pub resource_name: String,
    /// Dotted client path, e.g. `clients.uniprot`. Feeds the confidence and
    /// mapping-source derivation rules.
    pub client_name: String,
    pub input_ontology: String,
    pub output_ontology: String,
}

/// A directional view over a [`MappingPath`].
///
/// A reverse path is a thin wrapper over the forward path with
/// `is_reverse = true`; step order is reversed at iteration time and
/// downstream consumers read the flag rather than inspecting types.
#[derive(Clone, Debug)]
pub struct PathView {
    path: Arc<MappingPath>,
    is_reverse: bool,
}

impl PathView {
    #[must_use]
    pub fn forward(path: Arc<MappingPath>) -> Self {
        Self {
            path,
            is_reverse: false,
        }
    }

    #[must_use]
    pub fn reverse(path: Arc<MappingPath>) -> Self {
        Self {
            path,
            is_reverse: true,
        }
    }

    #[must_use]
    pub fn id(&self) -> i64 {
        self.path.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.path.name
    }

    #[must_use]
    pub fn is_reverse(&self) -> bool {
        self.is_reverse
    }

    #[must_use]
    pub fn direction(&self) -> MappingDirection {
        MappingDirection::from_reverse_flag(self.is_reverse)
    }

    /// Hop count of the underlying path (reverse wrappers report the
    /// forward path's step count).
    #[must_use]
    pub fn hop_count(&self) -> u32 {
        self.path.steps.len() as u32
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps_in_order(&self) -> Vec<&PathStep> {
        let mut steps: Vec<&PathStep> = self.path.steps.iter().collect();
        if self.is_reverse {
            steps.reverse();
        }
        steps
    }

    /// Resource facts for the derivation rules, in execution order.
    #[must_use]
    pub fn step_resources(&self) -> Vec<StepResourceInfo> {
        self.steps_in_order()
            .iter()
            .map(|s| StepResourceInfo::new(&s.resource_name, &s.client_name))
            .collect()
    }
}

/// Per-input outcome returned by a step's resource client.
#[derive(Clone, Debug, Default)]
pub struct StepOutcome {
    /// Mapped identifiers, or `None` when the input did not map.
    pub targets: Option<Vec<String>>,
    /// Whether a historical/secondary accession was resolved on the way.
    pub resolved_historical: bool,
}

#[derive(Debug, Error)]
#[error("step client error: {message}")]
pub struct StepClientError {
    pub message: String,
}

impl StepClientError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Contract for a mapping resource client invoked by one path step.
///
/// Clients receive the current working set and return an outcome per input
/// id. They may fan out internally; cancellation is observed by the runner
/// between steps.
#[async_trait]
pub trait StepClient: Send + Sync {
    async fn map_identifiers(
        &self,
        ids: &[String],
    ) -> Result<FxHashMap<String, StepOutcome>, StepClientError>;
}

/// Resolves the client used by each path step.
pub trait ClientProvider: Send + Sync {
    fn client_for(&self, step: &PathStep) -> Option<Arc<dyn StepClient>>;
}

/// Client provider backed by a resource-name map.
#[derive(Default)]
pub struct MapClientProvider {
    clients: FxHashMap<String, Arc<dyn StepClient>>,
}

impl MapClientProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_client(mut self, resource_name: impl Into<String>, client: Arc<dyn StepClient>) -> Self {
        self.clients.insert(resource_name.into(), client);
        self
    }
}

impl ClientProvider for MapClientProvider {
    fn client_for(&self, step: &PathStep) -> Option<Arc<dyn StepClient>> {
        self.clients.get(&step.resource_name).cloned()
    }
}

/// Provenance recorded for one executed step, attributed to one original
/// input identifier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepProvenance {
    pub step_id: i64,
    pub step_name: String,
    pub resource_id: i64,
    pub resource_name: String,
    pub input_ids: Vec<String>,
    pub output_ids: Vec<String>,
    pub resolved_historical: bool,
    pub duration_ms: i64,
}

/// Final per-identifier result of a path execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathResult {
    pub source_identifier: String,
    pub target_identifiers: Option<Vec<String>>,
    pub mapped_value: Option<String>,
    pub status: PathStatus,
    pub message: String,
    pub confidence_score: f64,
    pub hop_count: Option<u32>,
    pub mapping_direction: MappingDirection,
    #[serde(default)]
    pub mapping_path_details: Option<Value>,
    #[serde(default)]
    pub mapping_source: Option<MappingSource>,
    #[serde(default)]
    pub error_details: Option<Value>,
    #[serde(default)]
    pub provenance: Vec<StepProvenance>,
    #[serde(default)]
    pub cached: bool,
    /// Explicit score supplied by the producing action, if any. Feeds the
    /// confidence derivation on store.
    #[serde(default)]
    pub explicit_confidence: Option<f64>,
    #[serde(default)]
    pub additional_metadata: Option<Value>,
}

impl PathResult {
    /// The structured `mapping_path_details` record shared by the runner
    /// and the cache.
    #[must_use]
    pub fn build_path_details(view: &PathView, additional_metadata: Option<&Value>) -> Value {
        let steps: Vec<Value> = view
            .steps_in_order()
            .iter()
            .map(|s| {
                serde_json::json!({
                    "resource_name": s.resource_name,
                    "resource_client": s.client_name,
                    "input_ontology": s.input_ontology,
                    "output_ontology": s.output_ontology,
                })
            })
            .collect();
        let mut details = serde_json::json!({
            "path_id": view.id(),
            "path_name": view.name(),
            "hop_count": view.hop_count(),
            "direction": view.direction().as_str(),
            "steps": steps,
            "execution_timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(extra) = additional_metadata {
            details["additional_metadata"] = extra.clone();
        }
        details
    }
}
