use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use ontoflow::actions::{ActionDescriptor, ActionRegistry, ActionRegistryBuilder};
use ontoflow::engine::ExecutionEngine;
use ontoflow::events::{EventBus, MemorySink};
use ontoflow::persistence::PersistenceService;
use ontoflow::resources::{ResourceConfigDoc, ResourceManager};
use ontoflow::storage::FileSystemStorage;
use ontoflow::strategy::StrategyDoc;
use ontoflow::types::JobStatus;

/// A persistence service plus the scratch directory backing it. The
/// directory lives as long as the harness.
pub struct Harness {
    pub persistence: Arc<PersistenceService>,
    pub storage: Arc<FileSystemStorage>,
    _tmp: TempDir,
}

pub async fn harness() -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let storage = Arc::new(
        FileSystemStorage::new(tmp.path().join("blobs"))
            .await
            .expect("storage"),
    );
    let db_path = tmp.path().join("ontoflow-test.db");
    let url = format!("sqlite://{}", db_path.display());
    let persistence = Arc::new(
        PersistenceService::connect(&url, storage.clone())
            .await
            .expect("connect"),
    );
    Harness {
        persistence,
        storage,
        _tmp: tmp,
    }
}

/// Harness with tiny inline/compression limits so external-storage paths
/// are exercised without megabyte payloads.
pub async fn harness_with_limits(max_inline: usize, compress_threshold: usize) -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let storage = Arc::new(
        FileSystemStorage::new(tmp.path().join("blobs"))
            .await
            .expect("storage"),
    );
    let db_path = tmp.path().join("ontoflow-test.db");
    let url = format!("sqlite://{}", db_path.display());
    let persistence = Arc::new(
        PersistenceService::connect(&url, storage.clone())
            .await
            .expect("connect")
            .with_limits(max_inline, compress_threshold),
    );
    Harness {
        persistence,
        storage,
        _tmp: tmp,
    }
}

/// Full engine wired over a harness, with a memory sink capturing events.
pub struct EngineHarness {
    pub engine: Arc<ExecutionEngine>,
    pub persistence: Arc<PersistenceService>,
    pub sink: MemorySink,
    _tmp: TempDir,
}

pub async fn engine_harness(registry: ActionRegistryBuilder) -> EngineHarness {
    engine_harness_with_resources(registry, ResourceConfigDoc::default()).await
}

pub async fn engine_harness_with_resources(
    registry: ActionRegistryBuilder,
    resources: ResourceConfigDoc,
) -> EngineHarness {
    let tmp = TempDir::new().expect("tempdir");
    let storage = Arc::new(
        FileSystemStorage::new(tmp.path().join("blobs"))
            .await
            .expect("storage"),
    );
    let db_path = tmp.path().join("ontoflow-test.db");
    let url = format!("sqlite://{}", db_path.display());
    let persistence = Arc::new(
        PersistenceService::connect(&url, storage)
            .await
            .expect("connect"),
    );
    let manager = ResourceManager::from_config(resources).expect("resources");
    let sink = MemorySink::new();
    let bus = EventBus::with_sink(sink.clone());
    let engine = ExecutionEngine::new(
        persistence.clone(),
        Arc::new(registry.build()),
        manager,
        bus,
    );
    EngineHarness {
        engine,
        persistence,
        sink,
        _tmp: tmp,
    }
}

/// Register a fresh engine over an existing harness's persistence; used to
/// model a process restart in resume tests.
pub fn second_engine(
    persistence: Arc<PersistenceService>,
    registry: ActionRegistry,
) -> Arc<ExecutionEngine> {
    let manager = ResourceManager::from_config(ResourceConfigDoc::default()).expect("resources");
    ExecutionEngine::new(
        persistence,
        Arc::new(registry),
        manager,
        EventBus::with_sink(MemorySink::new()),
    )
}

pub fn descriptor(action: Arc<dyn ontoflow::actions::Action>) -> ActionDescriptor {
    ActionDescriptor::new(action)
}

/// The canonical three-step strategy used across engine tests.
pub fn three_step_strategy(checkpoint_after_each: bool) -> StrategyDoc {
    serde_json::from_value(json!({
        "name": "load_transform_save",
        "steps": [
            {"name": "load", "action": {"type": "LOAD", "params": {"in": "a.csv"}}},
            {"name": "transform", "action": {"type": "TRANSFORM"}},
            {"name": "save", "action": {"type": "SAVE"}}
        ],
        "checkpoint_policy": {"after_each_step": checkpoint_after_each}
    }))
    .expect("strategy doc")
}

/// Poll a job until it reaches a terminal status (bounded wait).
pub async fn wait_terminal(persistence: &PersistenceService, job_id: Uuid) -> JobStatus {
    for _ in 0..400 {
        let job = persistence.get_job(job_id).await.expect("get_job");
        if let Some(job) = job {
            if job.status.is_terminal() {
                return job.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} never reached a terminal status");
}

/// Poll until a given step row exists and is running/terminal.
pub async fn wait_step_started(persistence: &PersistenceService, job_id: Uuid, step_index: u32) {
    for _ in 0..400 {
        if persistence
            .get_step(job_id, step_index)
            .await
            .expect("get_step")
            .is_some()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("step {step_index} of job {job_id} never started");
}
