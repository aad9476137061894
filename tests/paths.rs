mod common;

use std::sync::Arc;

use common::*;

use ontoflow::paths::{
    MapClientProvider, MappingPath, PathRunOptions, PathRunner, PathStep, PathView,
};
use ontoflow::types::{MappingDirection, PathStatus};

fn step(id: i64, resource_name: &str, input: &str, output: &str) -> PathStep {
    PathStep {
        id,
        name: format!("step_{id}"),
        resource_id: id,
        resource_name: resource_name.to_string(),
        client_name: format!("clients.{resource_name}"),
        input_ontology: input.to_string(),
        output_ontology: output.to_string(),
    }
}

fn two_hop_path() -> Arc<MappingPath> {
    Arc::new(MappingPath {
        id: 1,
        name: "uniprot_to_arivale".to_string(),
        steps: vec![
            step(10, "uniprot", "UNIPROTKB_AC", "GENE_NAME"),
            step(11, "arivale", "GENE_NAME", "ARIVALE_PROTEIN_ID"),
        ],
    })
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

#[tokio::test]
async fn two_hop_success_with_provenance() {
    let hop1 = TableClient::new(&[("P01579", &["IFNG"])]);
    let hop2 = TableClient::new(&[("IFNG", &["AR_001"])]);
    let provider = MapClientProvider::new()
        .with_client("uniprot", hop1)
        .with_client("arivale", hop2);
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::forward(two_hop_path());

    let (results, metrics) = runner
        .execute_path(
            &view,
            &ids(&["P01579"]),
            "UNIPROTKB_AC",
            "ARIVALE_PROTEIN_ID",
            &PathRunOptions::default(),
        )
        .await;

    let result = &results["P01579"];
    assert_eq!(result.status, PathStatus::Success);
    assert_eq!(result.target_identifiers, Some(vec!["AR_001".to_string()]));
    assert_eq!(result.mapped_value.as_deref(), Some("AR_001"));
    assert_eq!(result.hop_count, Some(2));
    assert_eq!(result.confidence_score, 0.85);
    assert_eq!(result.mapping_direction, MappingDirection::Forward);

    assert_eq!(result.provenance.len(), 2);
    assert_eq!(result.provenance[0].resource_name, "uniprot");
    assert_eq!(result.provenance[0].input_ids, vec!["P01579".to_string()]);
    assert_eq!(result.provenance[0].output_ids, vec!["IFNG".to_string()]);
    assert_eq!(result.provenance[1].resource_name, "arivale");
    assert_eq!(result.provenance[1].output_ids, vec!["AR_001".to_string()]);

    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.error_count, 0);
    assert_eq!(metrics.missing_count, 0);
}

#[tokio::test]
async fn fan_out_attribution_credits_all_finals_to_the_source() {
    // One source maps to two intermediates, each producing different finals.
    let hop1 = TableClient::new(&[("P1", &["G1", "G2"])]);
    let hop2 = TableClient::new(&[("G1", &["A1"]), ("G2", &["A2", "A3"])]);
    let provider = MapClientProvider::new()
        .with_client("uniprot", hop1)
        .with_client("arivale", hop2);
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::forward(two_hop_path());

    let (results, _) = runner
        .execute_path(
            &view,
            &ids(&["P1"]),
            "UNIPROTKB_AC",
            "ARIVALE_PROTEIN_ID",
            &PathRunOptions::default(),
        )
        .await;

    let mut targets = results["P1"].target_identifiers.clone().unwrap();
    targets.sort();
    assert_eq!(targets, ids(&["A1", "A2", "A3"]));
}

#[tokio::test]
async fn unmapped_ids_get_no_mapping_found() {
    let hop1 = TableClient::new(&[("P1", &["G1"])]);
    let hop2 = TableClient::new(&[("G1", &["A1"])]);
    let provider = MapClientProvider::new()
        .with_client("uniprot", hop1)
        .with_client("arivale", hop2);
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::forward(two_hop_path());

    let (results, metrics) = runner
        .execute_path(
            &view,
            &ids(&["P1", "P_MISSING"]),
            "UNIPROTKB_AC",
            "ARIVALE_PROTEIN_ID",
            &PathRunOptions::default(),
        )
        .await;

    assert_eq!(results["P1"].status, PathStatus::Success);
    let miss = &results["P_MISSING"];
    assert_eq!(miss.status, PathStatus::NoMappingFound);
    assert_eq!(miss.confidence_score, 0.0);
    assert!(miss.message.contains("uniprot_to_arivale"));
    assert_eq!(metrics.missing_count, 1);
}

#[tokio::test]
async fn hop_bound_skips_the_path_entirely() {
    let hop1 = TableClient::new(&[("P1", &["G1"])]);
    let calls = hop1.clone();
    let provider = MapClientProvider::new()
        .with_client("uniprot", hop1)
        .with_client("arivale", TableClient::new(&[]));
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::forward(two_hop_path());

    let (results, _) = runner
        .execute_path(
            &view,
            &ids(&["P1"]),
            "UNIPROTKB_AC",
            "ARIVALE_PROTEIN_ID",
            &PathRunOptions {
                max_hop_count: Some(1),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(results["P1"].status, PathStatus::Skipped);
    assert_eq!(results["P1"].confidence_score, 0.0);
    assert_eq!(
        calls.calls.load(std::sync::atomic::Ordering::SeqCst),
        0,
        "skipped paths must not invoke clients"
    );
}

#[tokio::test]
async fn client_error_poisons_only_the_batch_without_panicking() {
    let provider = MapClientProvider::new()
        .with_client("uniprot", Arc::new(BrokenClient))
        .with_client("arivale", TableClient::new(&[]));
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::forward(two_hop_path());

    let (results, metrics) = runner
        .execute_path(
            &view,
            &ids(&["P1", "P2"]),
            "UNIPROTKB_AC",
            "ARIVALE_PROTEIN_ID",
            &PathRunOptions::default(),
        )
        .await;

    for id in ["P1", "P2"] {
        let result = &results[id];
        assert_eq!(result.status, PathStatus::ExecutionError);
        assert!(result.message.contains("upstream exploded"));
        assert!(result.error_details.is_some());
    }
    assert_eq!(metrics.error_count, 2);
}

#[tokio::test]
async fn reverse_view_iterates_steps_backwards() {
    // Reverse execution runs the arivale hop first.
    let back1 = TableClient::new(&[("AR_001", &["IFNG"])]);
    let back2 = TableClient::new(&[("IFNG", &["P01579"])]);
    let provider = MapClientProvider::new()
        .with_client("arivale", back1)
        .with_client("uniprot", back2);
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::reverse(two_hop_path());

    let (results, _) = runner
        .execute_path(
            &view,
            &ids(&["AR_001"]),
            "ARIVALE_PROTEIN_ID",
            "UNIPROTKB_AC",
            &PathRunOptions::default(),
        )
        .await;

    let result = &results["AR_001"];
    assert_eq!(result.status, PathStatus::Success);
    assert_eq!(result.target_identifiers, Some(vec!["P01579".to_string()]));
    assert_eq!(result.mapping_direction, MappingDirection::Reverse);
    // 2-hop base 0.85 minus the reverse penalty.
    assert_eq!(result.confidence_score, 0.75);
    assert_eq!(result.provenance[0].resource_name, "arivale");
}

#[tokio::test]
async fn min_confidence_filters_low_scores() {
    let hop1 = TableClient::new(&[("P1", &["G1"])]);
    let hop2 = TableClient::new(&[("G1", &["A1"])]);
    let provider = MapClientProvider::new()
        .with_client("uniprot", hop1)
        .with_client("arivale", hop2);
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::forward(two_hop_path());

    let (results, metrics) = runner
        .execute_path(
            &view,
            &ids(&["P1"]),
            "UNIPROTKB_AC",
            "ARIVALE_PROTEIN_ID",
            &PathRunOptions {
                min_confidence: 0.9,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(results["P1"].status, PathStatus::NoMappingFound);
    assert!(results["P1"].target_identifiers.is_none());
    assert_eq!(metrics.filtered_count, 1);
    assert_eq!(metrics.success_count, 0);
}

#[tokio::test]
async fn duplicate_inputs_are_deduplicated() {
    let hop1 = TableClient::new(&[("P1", &["G1"])]);
    let hop2 = TableClient::new(&[("G1", &["A1"])]);
    let provider = MapClientProvider::new()
        .with_client("uniprot", hop1)
        .with_client("arivale", hop2);
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::forward(two_hop_path());

    let (results, _) = runner
        .execute_path(
            &view,
            &ids(&["P1", "P1", "P1"]),
            "UNIPROTKB_AC",
            "ARIVALE_PROTEIN_ID",
            &PathRunOptions::default(),
        )
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results["P1"].status, PathStatus::Success);
}

#[tokio::test]
async fn batches_run_under_the_concurrency_limit() {
    // 6 inputs with batch_size 2 -> 3 batches; all must complete.
    let hop1 = TableClient::new(&[
        ("P1", &["G1"] as &[&str]),
        ("P2", &["G2"]),
        ("P3", &["G3"]),
        ("P4", &["G4"]),
        ("P5", &["G5"]),
        ("P6", &["G6"]),
    ]);
    let hop2 = TableClient::new(&[
        ("G1", &["A1"] as &[&str]),
        ("G2", &["A2"]),
        ("G3", &["A3"]),
        ("G4", &["A4"]),
        ("G5", &["A5"]),
        ("G6", &["A6"]),
    ]);
    let provider = MapClientProvider::new()
        .with_client("uniprot", hop1)
        .with_client("arivale", hop2);
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::forward(two_hop_path());

    let (results, metrics) = runner
        .execute_path(
            &view,
            &ids(&["P1", "P2", "P3", "P4", "P5", "P6"]),
            "UNIPROTKB_AC",
            "ARIVALE_PROTEIN_ID",
            &PathRunOptions {
                batch_size: 2,
                max_concurrent_batches: 2,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(results.len(), 6);
    assert_eq!(metrics.success_count, 6);
    assert_eq!(metrics.batch_timings_ms.len(), 3);
}
