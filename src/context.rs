//! The live, per-job execution context.
//!
//! An [`ExecutionContext`] is threaded through every step of a strategy: it
//! carries the identifiers being worked on, the ordered per-step results,
//! an append-only provenance trail, and a free-form map actions publish
//! into. It is exactly what a checkpoint serializes, so everything stored in
//! it must fit the documented serialization universe: null, booleans,
//! integers, floats, strings, sequences of these, and string-keyed maps of
//! these. Values outside that universe collapse to a string tag of their
//! type (see [`context_value`]).
//!
//! The context itself carries no serde derives; the persistence layer owns
//! the wire shape (`persistence::models::PersistedContext`) so the two can
//! evolve independently.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;

/// Per-job mutable state passed to each action in turn.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionContext {
    /// First identifier supplied to the job, if any.
    pub initial_identifier: Option<String>,
    /// Most recently produced identifier.
    pub current_identifier: Option<String>,
    /// Every identifier ever set, in order. Append-only.
    pub identifier_history: Vec<String>,
    /// Ontology namespace of the current identifier.
    pub ontology_type: Option<String>,
    /// Ordered per-step outcome records, keyed by step name.
    pub step_results: Vec<StepResultEntry>,
    /// Append-only evidence trail.
    pub provenance: Vec<ProvenanceEntry>,
    /// Free-form data published by actions. Keys are namespaced by
    /// convention (`step_<i>_output`, `step_<i>_output_ref`, ...).
    pub custom_action_data: FxHashMap<String, Value>,
    /// Per-job execution tunables.
    pub config: ContextConfig,
}

/// Outcome of one named step, as visible to later steps.
#[derive(Clone, Debug, PartialEq)]
pub struct StepResultEntry {
    pub step_name: String,
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One provenance record: who contributed what, when.
#[derive(Clone, Debug, PartialEq)]
pub struct ProvenanceEntry {
    pub source: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

/// Execution tunables carried inside the context so resumed jobs keep the
/// settings they started with.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextConfig {
    pub use_cache: bool,
    pub batch_size: usize,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            batch_size: 250,
            timeout_seconds: 3600,
            retry_attempts: 3,
        }
    }
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh context seeded the way the engine starts a new job.
    #[must_use]
    pub fn seeded(job_id: &str, strategy_name: &str) -> Self {
        let mut ctx = Self::default();
        ctx.custom_action_data
            .insert("job_id".to_string(), Value::String(job_id.to_string()));
        ctx.custom_action_data.insert(
            "strategy_name".to_string(),
            Value::String(strategy_name.to_string()),
        );
        ctx
    }

    /// Set the working identifier, maintaining history and the initial
    /// identifier invariant.
    pub fn set_identifier(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.initial_identifier.is_none() {
            self.initial_identifier = Some(id.clone());
        }
        self.identifier_history.push(id.clone());
        self.current_identifier = Some(id);
    }

    /// Record the outcome of a step. A re-run of the same step name (retry,
    /// resume) replaces the earlier entry in place so ordering is preserved.
    pub fn record_step(
        &mut self,
        step_name: impl Into<String>,
        success: bool,
        data: Value,
        error: Option<String>,
    ) {
        let entry = StepResultEntry {
            step_name: step_name.into(),
            success,
            data: sanitize_value(data),
            error,
            timestamp: Utc::now(),
        };
        if let Some(existing) = self
            .step_results
            .iter_mut()
            .find(|e| e.step_name == entry.step_name)
        {
            *existing = entry;
        } else {
            self.step_results.push(entry);
        }
    }

    #[must_use]
    pub fn latest_step_result(&self) -> Option<&StepResultEntry> {
        self.step_results.last()
    }

    #[must_use]
    pub fn step_result(&self, step_name: &str) -> Option<&StepResultEntry> {
        self.step_results.iter().find(|e| e.step_name == step_name)
    }

    /// Append a provenance record.
    pub fn add_provenance(
        &mut self,
        source: impl Into<String>,
        action: impl Into<String>,
        details: Value,
    ) {
        self.provenance.push(ProvenanceEntry {
            source: source.into(),
            action: action.into(),
            timestamp: Utc::now(),
            details: sanitize_value(details),
        });
    }

    /// Insert into `custom_action_data`, sanitizing to the documented
    /// serialization universe.
    pub fn insert_custom(&mut self, key: impl Into<String>, value: Value) {
        self.custom_action_data
            .insert(key.into(), sanitize_value(value));
    }

    #[must_use]
    pub fn get_custom(&self, key: &str) -> Option<&Value> {
        self.custom_action_data.get(key)
    }

    /// Whether a named key exists in the context (used by the `exists:`
    /// condition predicate).
    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        self.custom_action_data.contains_key(key)
            || self.step_results.iter().any(|e| e.step_name == key)
    }
}

/// Convert a typed value into a context-safe [`Value`].
///
/// Values that serialize cleanly pass through [`sanitize_value`]; anything
/// that fails to serialize is represented by its type name in angle
/// brackets, per the serialization contract. Actions holding data frames or
/// other rich values must move them into external result storage and keep
/// only descriptors in the context.
#[must_use]
pub fn context_value<T: Serialize>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => sanitize_value(v),
        Err(_) => Value::String(format!("<{}>", std::any::type_name::<T>())),
    }
}

/// Restrict a JSON value to the documented universe.
///
/// `serde_json::Value` already covers it structurally; the one hole is
/// numbers that carry no representable value (a `Number` can be constructed
/// from a non-finite float elsewhere and round-trips as null). Those are
/// collapsed to the `"<f64>"` type tag so a checkpoint restore compares
/// equal to what was written.
#[must_use]
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() || n.as_u64().is_some() || n.as_f64().is_some() {
                Value::Number(n)
            } else {
                Value::String("<f64>".to_string())
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifier_history_is_append_only() {
        let mut ctx = ExecutionContext::new();
        ctx.set_identifier("P01579");
        ctx.set_identifier("AR_001");
        assert_eq!(ctx.initial_identifier.as_deref(), Some("P01579"));
        assert_eq!(ctx.current_identifier.as_deref(), Some("AR_001"));
        assert_eq!(ctx.identifier_history, vec!["P01579", "AR_001"]);
    }

    #[test]
    fn step_results_keep_order_and_replace_in_place() {
        let mut ctx = ExecutionContext::new();
        ctx.record_step("load", true, json!({"rows": 10}), None);
        ctx.record_step("map", false, Value::Null, Some("boom".into()));
        ctx.record_step("load", true, json!({"rows": 11}), None);

        assert_eq!(ctx.step_results.len(), 2);
        assert_eq!(ctx.step_results[0].step_name, "load");
        assert_eq!(ctx.step_results[0].data, json!({"rows": 11}));
        assert_eq!(ctx.latest_step_result().unwrap().step_name, "map");
    }

    #[test]
    fn context_value_tags_unserializable_types() {
        struct Opaque;
        impl Serialize for Opaque {
            fn serialize<S: serde::Serializer>(&self, _s: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("not representable"))
            }
        }
        let tagged = context_value(&Opaque);
        let Value::String(s) = tagged else {
            panic!("expected string tag")
        };
        assert!(s.starts_with('<') && s.ends_with('>'));
    }

    #[test]
    fn has_key_sees_custom_data_and_step_names() {
        let mut ctx = ExecutionContext::seeded("j1", "s1");
        ctx.record_step("load", true, json!(1), None);
        assert!(ctx.has_key("job_id"));
        assert!(ctx.has_key("load"));
        assert!(!ctx.has_key("missing"));
    }
}
