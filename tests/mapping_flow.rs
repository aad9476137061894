//! End-to-end mapping flow: execute a path, cache the results, and serve
//! the second request from the cache without touching any resource client.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;

use ontoflow::cache::CacheManager;
use ontoflow::paths::{
    MapClientProvider, MappingPath, PathRunOptions, PathRunner, PathStep, PathView,
};
use ontoflow::types::{MappingDirection, PathStatus};

fn two_hop_path() -> Arc<MappingPath> {
    Arc::new(MappingPath {
        id: 42,
        name: "uniprot_to_arivale".to_string(),
        steps: vec![
            PathStep {
                id: 420,
                name: "uniprot_to_gene".to_string(),
                resource_id: 1,
                resource_name: "uniprot".to_string(),
                client_name: "clients.uniprot".to_string(),
                input_ontology: "UNIPROTKB_AC".to_string(),
                output_ontology: "GENE_NAME".to_string(),
            },
            PathStep {
                id: 421,
                name: "gene_to_arivale".to_string(),
                resource_id: 2,
                resource_name: "arivale".to_string(),
                client_name: "clients.arivale".to_string(),
                input_ontology: "GENE_NAME".to_string(),
                output_ontology: "ARIVALE_PROTEIN_ID".to_string(),
            },
        ],
    })
}

#[tokio::test]
async fn first_run_computes_second_run_hits_cache() {
    let h = harness().await;
    let cache = CacheManager::new(h.persistence.pool().clone());

    let hop1 = TableClient::new(&[("P01579", &["IFNG"])]);
    let hop2 = TableClient::new(&[("IFNG", &["AR_001"])]);
    let provider = MapClientProvider::new()
        .with_client("uniprot", hop1.clone())
        .with_client("arivale", hop2.clone());
    let runner = PathRunner::new(Arc::new(provider));
    let view = PathView::forward(two_hop_path());
    let ids = vec!["P01579".to_string()];

    // First run: nothing cached, clients invoked, results stored.
    let (cached, uncached) = cache
        .check_cache(&ids, "UNIPROTKB_AC", "ARIVALE_PROTEIN_ID", None, None)
        .await
        .unwrap();
    assert!(cached.is_empty());
    assert_eq!(uncached, ids);

    let (results, _) = runner
        .execute_path(
            &view,
            &uncached,
            "UNIPROTKB_AC",
            "ARIVALE_PROTEIN_ID",
            &PathRunOptions::default(),
        )
        .await;
    assert_eq!(results["P01579"].status, PathStatus::Success);
    assert_eq!(results["P01579"].confidence_score, 0.85);

    cache
        .store_mapping_results(&results, &view, "UNIPROTKB_AC", "ARIVALE_PROTEIN_ID")
        .await
        .unwrap();

    let hop1_calls = hop1.calls.load(Ordering::SeqCst);
    let hop2_calls = hop2.calls.load(Ordering::SeqCst);
    assert_eq!(hop1_calls, 1);
    assert_eq!(hop2_calls, 1);

    // Second request: served entirely from cache, clients untouched.
    let (cached, uncached) = cache
        .check_cache(&ids, "UNIPROTKB_AC", "ARIVALE_PROTEIN_ID", None, None)
        .await
        .unwrap();
    assert!(uncached.is_empty());

    let hit = &cached["P01579"];
    assert!(hit.cached);
    assert_eq!(hit.target_identifiers, Some(vec!["AR_001".to_string()]));
    assert_eq!(hit.confidence_score, 0.85);
    assert_eq!(hit.hop_count, Some(2));
    assert_eq!(hit.mapping_direction, MappingDirection::Forward);
    assert_eq!(hit.status, PathStatus::Success);

    assert_eq!(hop1.calls.load(Ordering::SeqCst), hop1_calls);
    assert_eq!(hop2.calls.load(Ordering::SeqCst), hop2_calls);
}
