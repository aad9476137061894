//! Confidence and mapping-source derivation rules.
//!
//! These tables are part of the cache's contract: cached rows written today
//! must compare equal to rows recomputed later, so the exact numbers are
//! pinned by tests.

use crate::types::MappingSource;

/// The per-step resource facts the derivation rules look at.
#[derive(Clone, Debug, Default)]
pub struct StepResourceInfo {
    pub resource_name: String,
    pub client_name: String,
}

impl StepResourceInfo {
    #[must_use]
    pub fn new(resource_name: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            client_name: client_name.into(),
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.resource_name.to_lowercase().contains(needle)
            || self.client_name.to_lowercase().contains(needle)
    }
}

/// Derive a confidence score for a mapping result.
///
/// An explicit score from the action wins. Otherwise the base is a function
/// of hop count:
///
/// | hop_count | base |
/// |----------:|-----:|
/// | None      | 0.70 |
/// | 1         | 0.95 |
/// | 2         | 0.85 |
/// | 3         | 0.75 |
/// | >= 4      | max(0.15, 0.75 - 0.10 * (h - 3)) |
///
/// minus 0.10 for reverse execution, minus 0.05 if any step resource
/// matches `rag`, minus a further 0.10 for `llm`. Clamped to [0, 1] and
/// rounded to two decimals.
#[must_use]
pub fn derive_confidence(
    explicit: Option<f64>,
    hop_count: Option<u32>,
    is_reverse: bool,
    steps: &[StepResourceInfo],
) -> f64 {
    if let Some(score) = explicit {
        return score;
    }

    let mut confidence = match hop_count {
        None => 0.70,
        Some(1) => 0.95,
        Some(2) => 0.85,
        Some(3) => 0.75,
        Some(h) => (0.75 - 0.10 * f64::from(h - 3)).max(0.15),
    };

    if is_reverse {
        confidence -= 0.10;
    }
    if steps.iter().any(|s| s.matches("rag")) {
        confidence -= 0.05;
    }
    if steps.iter().any(|s| s.matches("llm")) {
        confidence -= 0.10;
    }

    (confidence.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// Scan the ordered steps; the first one whose resource name or client path
/// contains `spoke`, `rag`, `llm`, or `ramp` determines the mapping source.
/// Otherwise the source is `api`.
#[must_use]
pub fn determine_mapping_source(steps: &[StepResourceInfo]) -> MappingSource {
    for step in steps {
        if step.matches("spoke") {
            return MappingSource::Spoke;
        }
        if step.matches("rag") {
            return MappingSource::Rag;
        }
        if step.matches("llm") {
            return MappingSource::Llm;
        }
        if step.matches("ramp") {
            return MappingSource::Ramp;
        }
    }
    MappingSource::Api
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_steps() -> Vec<StepResourceInfo> {
        Vec::new()
    }

    #[test]
    fn base_table_is_pinned() {
        assert_eq!(derive_confidence(None, None, false, &no_steps()), 0.70);
        assert_eq!(derive_confidence(None, Some(1), false, &no_steps()), 0.95);
        assert_eq!(derive_confidence(None, Some(2), false, &no_steps()), 0.85);
        assert_eq!(derive_confidence(None, Some(3), false, &no_steps()), 0.75);
        assert_eq!(derive_confidence(None, Some(4), false, &no_steps()), 0.65);
        assert_eq!(derive_confidence(None, Some(5), false, &no_steps()), 0.55);
        assert_eq!(derive_confidence(None, Some(9), false, &no_steps()), 0.15);
        assert_eq!(derive_confidence(None, Some(50), false, &no_steps()), 0.15);
    }

    #[test]
    fn explicit_score_wins() {
        assert_eq!(derive_confidence(Some(0.42), Some(1), true, &no_steps()), 0.42);
    }

    #[test]
    fn reverse_and_resource_penalties_stack() {
        assert_eq!(derive_confidence(None, Some(1), true, &no_steps()), 0.85);
        let rag = vec![StepResourceInfo::new("pubchem_rag_store", "clients.rag")];
        assert_eq!(derive_confidence(None, Some(1), false, &rag), 0.90);
        let both = vec![
            StepResourceInfo::new("pubchem_rag_store", "clients.rag"),
            StepResourceInfo::new("llm_mapper", "clients.llm"),
        ];
        assert_eq!(derive_confidence(None, Some(1), true, &both), 0.70);
    }

    #[test]
    fn confidence_monotonically_non_increasing_in_hops() {
        let mut last = f64::INFINITY;
        for hops in 1..12 {
            let c = derive_confidence(None, Some(hops), false, &no_steps());
            assert!(c <= last, "hop {hops}: {c} > {last}");
            last = c;
        }
    }

    #[test]
    fn reverse_is_strictly_lower_than_forward() {
        for hops in 1..8 {
            let fwd = derive_confidence(None, Some(hops), false, &no_steps());
            let rev = derive_confidence(None, Some(hops), true, &no_steps());
            assert!(rev < fwd, "hop {hops}");
        }
    }

    #[test]
    fn first_matching_step_determines_source() {
        let steps = vec![
            StepResourceInfo::new("uniprot_api", "clients.uniprot"),
            StepResourceInfo::new("spoke_graph", "clients.spoke"),
            StepResourceInfo::new("llm_mapper", "clients.llm"),
        ];
        assert_eq!(determine_mapping_source(&steps), MappingSource::Spoke);
        assert_eq!(determine_mapping_source(&[]), MappingSource::Api);
        let plain = vec![StepResourceInfo::new("uniprot_api", "clients.uniprot")];
        assert_eq!(determine_mapping_source(&plain), MappingSource::Api);
    }
}
