//! Parsed strategy documents.
//!
//! The engine consumes strategies that have already been parsed and validated
//! upstream; this module is the in-memory shape of such a document plus the
//! deliberately tiny condition dialect steps may gate themselves on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;

/// A complete strategy: an ordered pipeline of named steps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyDoc {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<StrategyStep>,
    #[serde(default)]
    pub checkpoint_policy: Option<CheckpointPolicy>,
}

impl StrategyDoc {
    #[must_use]
    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }
}

/// One step of a strategy. `name` is unique within the document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyStep {
    pub name: String,
    pub action: StepAction,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub checkpoint_before: bool,
    #[serde(default)]
    pub checkpoint_after: bool,
    #[serde(default)]
    pub on_error: Option<OnError>,
    #[serde(default = "default_true")]
    pub is_required: bool,
}

fn default_true() -> bool {
    true
}

/// The action half of a step: an upper-snake-case type name plus free-form
/// parameters that the registry validates against the action's schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Strategy-level checkpoint policy. Step-level `checkpoint_before` /
/// `checkpoint_after` flags are OR-ed with this.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    #[serde(default)]
    pub before_each_step: bool,
    #[serde(default)]
    pub after_each_step: bool,
    #[serde(default)]
    pub before_actions: Vec<String>,
    #[serde(default)]
    pub after_actions: Vec<String>,
}

impl CheckpointPolicy {
    #[must_use]
    pub fn wants_before(&self, step: &StrategyStep) -> bool {
        step.checkpoint_before
            || self.before_each_step
            || self
                .before_actions
                .iter()
                .any(|a| a == &step.action.action_type)
    }

    #[must_use]
    pub fn wants_after(&self, step: &StrategyStep) -> bool {
        step.checkpoint_after
            || self.after_each_step
            || self
                .after_actions
                .iter()
                .any(|a| a == &step.action.action_type)
    }
}

/// What to do when a step's action raises.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnError {
    pub action: ErrorAction,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds to sleep between attempts. When absent the engine applies an
    /// exponential back-off of `2^attempt` seconds.
    #[serde(default)]
    pub delay: Option<f64>,
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    Retry,
    Fail,
}

/// The closed condition dialect.
///
/// Exactly three predicates are understood: the literal `true`,
/// `has_results`, and `exists:<key>`. Anything else evaluates to `true`
/// (fail-open) and is reported so the engine can log a warning; the dialect
/// stays closed on purpose so no expression evaluator grows here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    True,
    HasResults,
    Exists(String),
    Unsupported(String),
}

impl Condition {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "true" {
            Condition::True
        } else if trimmed == "has_results" {
            Condition::HasResults
        } else if let Some(key) = trimmed.strip_prefix("exists:") {
            Condition::Exists(key.trim().to_string())
        } else {
            Condition::Unsupported(trimmed.to_string())
        }
    }

    /// Evaluate against the live context. Returns `(outcome, unsupported)`;
    /// `unsupported` is set when the fail-open branch was taken.
    #[must_use]
    pub fn evaluate(&self, ctx: &ExecutionContext) -> (bool, bool) {
        match self {
            Condition::True => (true, false),
            Condition::HasResults => {
                let has = ctx
                    .latest_step_result()
                    .map(|r| r.success && !r.data.is_null())
                    .unwrap_or(false);
                (has, false)
            }
            Condition::Exists(key) => (ctx.has_key(key), false),
            Condition::Unsupported(_) => (true, true),
        }
    }
}
