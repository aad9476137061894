mod common;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use httpmock::prelude::*;
use serde_json::json;

use ontoflow::actions::ActionRegistry;
use ontoflow::engine::JobService;
use ontoflow::persistence::ExecutionOptions;
use ontoflow::resources::{
    AdapterError, ResourceAdapter, ResourceConfigDoc, ResourceError, ResourceKind,
    ResourceManager, ResourceSpec, ResourceStatus,
};
use ontoflow::strategy::StrategyDoc;
use ontoflow::types::JobStatus;

/// Adapter that reports a switchable status and counts start calls.
struct ToggleAdapter {
    healthy: AtomicBool,
    starts: AtomicU32,
    start_heals: bool,
}

impl ToggleAdapter {
    fn unhealthy_until_started() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(false),
            starts: AtomicU32::new(0),
            start_heals: true,
        })
    }

    fn permanently_down() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(false),
            starts: AtomicU32::new(0),
            start_heals: false,
        })
    }
}

#[async_trait]
impl ResourceAdapter for ToggleAdapter {
    async fn check(&self, _spec: &ResourceSpec) -> Result<ResourceStatus, AdapterError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(ResourceStatus::Healthy)
        } else {
            Ok(ResourceStatus::Unavailable)
        }
    }

    async fn start(&self, _spec: &ResourceSpec) -> Result<bool, AdapterError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.start_heals {
            self.healthy.store(true, Ordering::SeqCst);
        }
        Ok(self.start_heals)
    }
}

fn vector_store_spec(name: &str, required: bool, auto_start: bool) -> ResourceSpec {
    serde_json::from_value(json!({
        "name": name,
        "type": "vector_store",
        "required": required,
        "auto_start": auto_start,
        "start_poll_attempts": 3,
        "start_poll_interval_ms": 10,
        "config": {"host": "localhost", "port": 6333}
    }))
    .expect("spec")
}

#[tokio::test]
async fn unknown_resource_is_an_error() {
    let manager = ResourceManager::from_config(ResourceConfigDoc::default()).unwrap();
    let err = manager.check("nope").await.unwrap_err();
    assert!(matches!(err, ResourceError::UnknownResource { .. }));
    let err = manager.start("nope").await.unwrap_err();
    assert!(matches!(err, ResourceError::UnknownResource { .. }));
}

#[tokio::test]
async fn http_api_probe_maps_status_codes() {
    let server = MockServer::start_async().await;
    let healthy_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(200);
        })
        .await;

    let doc = ResourceConfigDoc {
        resources: vec![serde_json::from_value(json!({
            "name": "cts_api",
            "type": "external_http_api",
            "config": {"health_url": server.url("/health")}
        }))
        .unwrap()],
        action_requirements: Default::default(),
    };
    let manager = ResourceManager::from_config(doc).unwrap();

    assert_eq!(manager.check("cts_api").await.unwrap(), ResourceStatus::Healthy);
    healthy_mock.delete_async().await;

    server
        .mock_async(|when, then| {
            when.method(GET).path("/health");
            then.status(503);
        })
        .await;
    assert_eq!(
        manager.check("cts_api").await.unwrap(),
        ResourceStatus::Degraded
    );

    let status = manager.get_status();
    assert_eq!(status["cts_api"].status, ResourceStatus::Degraded);
}

#[tokio::test]
async fn http_api_without_url_is_rejected_at_registration() {
    let doc = ResourceConfigDoc {
        resources: vec![serde_json::from_value(json!({
            "name": "broken_api",
            "type": "external_http_api",
            "config": {}
        }))
        .unwrap()],
        action_requirements: Default::default(),
    };
    let err = ResourceManager::from_config(doc).unwrap_err();
    assert!(matches!(err, ResourceError::InvalidConfig { .. }));
}

#[tokio::test]
async fn start_is_idempotent_and_polls_health() {
    let doc = ResourceConfigDoc {
        resources: vec![vector_store_spec("qdrant", true, true)],
        action_requirements: Default::default(),
    };
    let manager = ResourceManager::from_config(doc).unwrap();
    let adapter = ToggleAdapter::unhealthy_until_started();
    manager.set_adapter(ResourceKind::VectorStore, adapter.clone());

    assert!(manager.start("qdrant").await.unwrap());
    assert_eq!(adapter.starts.load(Ordering::SeqCst), 1);

    // Already healthy: success without adapter work.
    assert!(manager.start("qdrant").await.unwrap());
    assert_eq!(adapter.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ensure_required_auto_starts_unhealthy_resources() {
    let doc = ResourceConfigDoc {
        resources: vec![
            vector_store_spec("qdrant", true, true),
            vector_store_spec("optional_store", false, false),
        ],
        action_requirements: Default::default(),
    };
    let manager = ResourceManager::from_config(doc).unwrap();
    manager.set_adapter(
        ResourceKind::VectorStore,
        ToggleAdapter::unhealthy_until_started(),
    );

    let outcomes = manager.ensure_required().await;
    assert_eq!(outcomes.len(), 1, "only required resources are reported");
    assert!(outcomes["qdrant"]);
}

#[tokio::test]
async fn ensure_required_reports_failure_without_auto_start() {
    let doc = ResourceConfigDoc {
        resources: vec![vector_store_spec("qdrant", true, false)],
        action_requirements: Default::default(),
    };
    let manager = ResourceManager::from_config(doc).unwrap();
    manager.set_adapter(ResourceKind::VectorStore, ToggleAdapter::permanently_down());

    let outcomes = manager.ensure_required().await;
    assert!(!outcomes["qdrant"]);
}

#[tokio::test]
async fn required_resources_derive_from_action_types() {
    let mut action_requirements = rustc_hash::FxHashMap::default();
    action_requirements.insert(
        "SEMANTIC_METABOLITE_MATCH".to_string(),
        vec!["qdrant".to_string()],
    );
    action_requirements.insert(
        "CTS_ENRICHED_MATCH".to_string(),
        vec!["cts_api".to_string()],
    );
    let doc = ResourceConfigDoc {
        resources: vec![],
        action_requirements,
    };
    let manager = ResourceManager::from_config(doc).unwrap();

    let strategy: StrategyDoc = serde_json::from_value(json!({
        "name": "metabolites",
        "steps": [
            {"name": "match", "action": {"type": "SEMANTIC_METABOLITE_MATCH"}},
            {"name": "plain", "action": {"type": "LOAD_DATASET_IDENTIFIERS"}}
        ]
    }))
    .unwrap();

    let required = manager.required_resources_for(&strategy);
    assert_eq!(required.len(), 1);
    assert!(required.contains("qdrant"));
}

#[tokio::test]
async fn job_fails_when_required_resource_cannot_start() {
    let mut action_requirements = rustc_hash::FxHashMap::default();
    action_requirements.insert("MATCH".to_string(), vec!["qdrant".to_string()]);
    let resources = ResourceConfigDoc {
        resources: vec![vector_store_spec("qdrant", true, true)],
        action_requirements,
    };

    let registry = ActionRegistry::builder()
        .register("MATCH", descriptor(Arc::new(OkAction::default())));
    let h = engine_harness_with_resources(registry, resources).await;
    h.engine
        .resources()
        .set_adapter(ResourceKind::VectorStore, ToggleAdapter::permanently_down());
    let service = JobService::new(h.engine.clone());

    let strategy: StrategyDoc = serde_json::from_value(json!({
        "name": "gated",
        "steps": [{"name": "match", "action": {"type": "MATCH"}}]
    }))
    .unwrap();

    let (job_id, outcome) = service
        .submit_and_wait(strategy, json!({}), ExecutionOptions::default(), None, vec![], None)
        .await
        .unwrap();
    assert!(!outcome.success);

    let job = h.persistence.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("qdrant"));
    // The job never reached Running, so no step rows exist.
    assert!(h.persistence.list_steps(job_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn job_runs_when_gated_resource_auto_starts() {
    let mut action_requirements = rustc_hash::FxHashMap::default();
    action_requirements.insert("MATCH".to_string(), vec!["qdrant".to_string()]);
    let resources = ResourceConfigDoc {
        resources: vec![vector_store_spec("qdrant", true, true)],
        action_requirements,
    };

    let registry = ActionRegistry::builder()
        .register("MATCH", descriptor(Arc::new(OkAction::default())));
    let h = engine_harness_with_resources(registry, resources).await;
    let adapter = ToggleAdapter::unhealthy_until_started();
    h.engine
        .resources()
        .set_adapter(ResourceKind::VectorStore, adapter.clone());
    let service = JobService::new(h.engine.clone());

    let strategy: StrategyDoc = serde_json::from_value(json!({
        "name": "gated",
        "steps": [{"name": "match", "action": {"type": "MATCH"}}]
    }))
    .unwrap();

    let (job_id, outcome) = service
        .submit_and_wait(strategy, json!({}), ExecutionOptions::default(), None, vec![], None)
        .await
        .unwrap();
    assert!(outcome.success);
    assert!(adapter.starts.load(Ordering::SeqCst) >= 1);

    let job = h.persistence.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn supervisor_restarts_auto_start_resource() {
    let doc = ResourceConfigDoc {
        resources: vec![serde_json::from_value(json!({
            "name": "qdrant",
            "type": "vector_store",
            "required": true,
            "auto_start": true,
            "health_check_interval_secs": 1,
            "start_poll_attempts": 2,
            "start_poll_interval_ms": 10,
            "config": {}
        }))
        .unwrap()],
        action_requirements: Default::default(),
    };
    let manager = ResourceManager::from_config(doc).unwrap();
    let adapter = ToggleAdapter::unhealthy_until_started();
    manager.set_adapter(ResourceKind::VectorStore, adapter.clone());

    manager.initialize();
    // Within a few supervision ticks the resource is probed, found
    // unavailable, and restarted.
    for _ in 0..100 {
        if adapter.starts.load(Ordering::SeqCst) >= 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(adapter.starts.load(Ordering::SeqCst) >= 1);
    manager.shutdown().await;

    let status = manager.get_status();
    assert_eq!(status["qdrant"].status, ResourceStatus::Healthy);
}
