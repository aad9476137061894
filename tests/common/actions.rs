//! Stub actions and step clients shared by the integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use ontoflow::actions::{Action, ActionError, StepOutput};
use ontoflow::context::ExecutionContext;
use ontoflow::paths::{StepClient, StepClientError, StepOutcome};

/// Succeeds immediately, reporting 100 processed records. Counts calls.
#[derive(Default)]
pub struct OkAction {
    pub calls: AtomicU32,
}

#[async_trait]
impl Action for OkAction {
    async fn execute(
        &self,
        _params: &Value,
        _ctx: &mut ExecutionContext,
        _cancel: &CancellationToken,
    ) -> Result<StepOutput, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StepOutput::ok().with_records(100, 100))
    }
}

/// Always fails with a retryable error. Counts calls.
#[derive(Default)]
pub struct FailAction {
    pub calls: AtomicU32,
}

#[async_trait]
impl Action for FailAction {
    async fn execute(
        &self,
        _params: &Value,
        _ctx: &mut ExecutionContext,
        _cancel: &CancellationToken,
    ) -> Result<StepOutput, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ActionError::failed("deliberate failure"))
    }
}

/// Fails the first `fail_times` invocations, then succeeds.
pub struct FlakyAction {
    pub calls: AtomicU32,
    pub fail_times: u32,
}

impl FlakyAction {
    pub fn new(fail_times: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_times,
        }
    }
}

#[async_trait]
impl Action for FlakyAction {
    async fn execute(
        &self,
        _params: &Value,
        _ctx: &mut ExecutionContext,
        _cancel: &CancellationToken,
    ) -> Result<StepOutput, ActionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            Err(ActionError::failed(format!("flaky failure {}", call + 1)))
        } else {
            Ok(StepOutput::ok().with_records(10, 10))
        }
    }
}

/// Sleeps until cancelled or the duration elapses.
pub struct SleepAction {
    pub duration: Duration,
}

#[async_trait]
impl Action for SleepAction {
    async fn execute(
        &self,
        _params: &Value,
        _ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, ActionError> {
        tokio::select! {
            () = cancel.cancelled() => Err(ActionError::Cancelled),
            () = tokio::time::sleep(self.duration) => Ok(StepOutput::ok()),
        }
    }
}

/// Blocks on the cancellation token the first time it runs; succeeds on
/// later invocations. Models a step interrupted by a crash and re-run on
/// resume.
#[derive(Default)]
pub struct BlockOnceAction {
    pub calls: AtomicU32,
}

#[async_trait]
impl Action for BlockOnceAction {
    async fn execute(
        &self,
        _params: &Value,
        _ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, ActionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            cancel.cancelled().await;
            Err(ActionError::Cancelled)
        } else {
            Ok(StepOutput::ok().with_records(5, 5))
        }
    }
}

/// Produces a payload of the requested size so oversize-output handling is
/// exercised.
pub struct BigOutputAction {
    pub bytes: usize,
}

#[async_trait]
impl Action for BigOutputAction {
    async fn execute(
        &self,
        _params: &Value,
        _ctx: &mut ExecutionContext,
        _cancel: &CancellationToken,
    ) -> Result<StepOutput, ActionError> {
        let blob = "x".repeat(self.bytes);
        Ok(StepOutput::ok()
            .with_records(1, 1)
            .with_data("payload", json!(blob)))
    }
}

/// Step client backed by a fixed mapping table.
pub struct TableClient {
    table: FxHashMap<String, Vec<String>>,
    pub calls: AtomicU32,
}

impl TableClient {
    pub fn new(pairs: &[(&str, &[&str])]) -> Arc<Self> {
        let mut table = FxHashMap::default();
        for (source, targets) in pairs {
            table.insert(
                (*source).to_string(),
                targets.iter().map(|t| (*t).to_string()).collect(),
            );
        }
        Arc::new(Self {
            table,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl StepClient for TableClient {
    async fn map_identifiers(
        &self,
        ids: &[String],
    ) -> Result<FxHashMap<String, StepOutcome>, StepClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut results = FxHashMap::default();
        for id in ids {
            if let Some(targets) = self.table.get(id) {
                results.insert(
                    id.clone(),
                    StepOutcome {
                        targets: Some(targets.clone()),
                        resolved_historical: false,
                    },
                );
            }
        }
        Ok(results)
    }
}

/// Step client that always errors.
pub struct BrokenClient;

#[async_trait]
impl StepClient for BrokenClient {
    async fn map_identifiers(
        &self,
        _ids: &[String],
    ) -> Result<FxHashMap<String, StepOutcome>, StepClientError> {
        Err(StepClientError::new("upstream exploded"))
    }
}
