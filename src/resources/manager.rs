//! The resource manager: registry, supervisors, and lifecycle control.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::strategy::StrategyDoc;

use super::adapters::{HttpProbeAdapter, ResourceAdapter, StaticAdapter};
use super::{
    ManagedResource, ResourceConfigDoc, ResourceError, ResourceKind, ResourceSpec, ResourceStatus,
    Result,
};

struct ResourceEntry {
    spec: ResourceSpec,
    state: ParkingMutex<ManagedResource>,
    /// Serializes start/stop/check mutations per resource.
    lifecycle: AsyncMutex<()>,
}

pub struct ResourceManager {
    entries: ParkingMutex<FxHashMap<String, Arc<ResourceEntry>>>,
    adapters: ParkingMutex<FxHashMap<ResourceKind, Arc<dyn ResourceAdapter>>>,
    action_requirements: FxHashMap<String, Vec<String>>,
    shutdown: CancellationToken,
    supervisors: ParkingMutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager").finish_non_exhaustive()
    }
}

impl ResourceManager {
    /// Build a manager from the resource-configuration document, wiring the
    /// default adapters: an HTTP probe for external APIs and a static
    /// Healthy probe for databases and filesystems. Container and
    /// vector-store adapters are supplied by the embedder via
    /// [`set_adapter`](Self::set_adapter).
    pub fn from_config(config: ResourceConfigDoc) -> Result<Arc<Self>> {
        let manager = Arc::new(Self {
            entries: ParkingMutex::new(FxHashMap::default()),
            adapters: ParkingMutex::new(FxHashMap::default()),
            action_requirements: config.action_requirements,
            shutdown: CancellationToken::new(),
            supervisors: ParkingMutex::new(Vec::new()),
        });
        {
            let mut adapters = manager.adapters.lock();
            adapters.insert(
                ResourceKind::ExternalHttpApi,
                Arc::new(HttpProbeAdapter::new()),
            );
            adapters.insert(ResourceKind::Database, Arc::new(StaticAdapter::healthy()));
            adapters.insert(ResourceKind::Filesystem, Arc::new(StaticAdapter::healthy()));
        }
        for spec in config.resources {
            manager.register(spec)?;
        }
        Ok(manager)
    }

    /// Install (or replace) the adapter used for a resource kind.
    pub fn set_adapter(&self, kind: ResourceKind, adapter: Arc<dyn ResourceAdapter>) {
        self.adapters.lock().insert(kind, adapter);
    }

    /// Register a resource, validating type-specific config.
    #[instrument(skip(self, spec), fields(name = %spec.name), err)]
    pub fn register(&self, spec: ResourceSpec) -> Result<()> {
        if spec.kind == ResourceKind::ExternalHttpApi
            && spec.config.get("health_url").is_none()
            && spec.config.get("base_url").is_none()
        {
            return Err(ResourceError::InvalidConfig {
                name: spec.name.clone(),
                message: "external_http_api requires health_url or base_url".to_string(),
            });
        }

        let state = ManagedResource {
            name: spec.name.clone(),
            kind: spec.kind,
            status: ResourceStatus::Unknown,
            last_check: Utc::now(),
            error_message: None,
            metadata: FxHashMap::default(),
        };
        let entry = Arc::new(ResourceEntry {
            state: ParkingMutex::new(state),
            lifecycle: AsyncMutex::new(()),
            spec,
        });
        let name = entry.spec.name.clone();
        self.entries.lock().insert(name.clone(), entry);
        tracing::debug!(resource = %name, "registered resource");
        Ok(())
    }

    fn entry(&self, name: &str) -> Result<Arc<ResourceEntry>> {
        self.entries
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::UnknownResource {
                name: name.to_string(),
            })
    }

    fn adapter_for(&self, kind: ResourceKind) -> Option<Arc<dyn ResourceAdapter>> {
        self.adapters.lock().get(&kind).cloned()
    }

    /// Probe a resource and record the outcome. Adapter errors are caught,
    /// recorded on the resource, and surfaced as Unavailable.
    #[instrument(skip(self), err)]
    pub async fn check(&self, name: &str) -> Result<ResourceStatus> {
        let entry = self.entry(name)?;
        let status = match self.adapter_for(entry.spec.kind) {
            None => ResourceStatus::Unknown,
            Some(adapter) => match adapter.check(&entry.spec).await {
                Ok(status) => {
                    let mut state = entry.state.lock();
                    state.status = status;
                    state.last_check = Utc::now();
                    state.error_message = None;
                    return Ok(status);
                }
                Err(e) => {
                    tracing::error!(resource = %name, error = %e, "health check failed");
                    let mut state = entry.state.lock();
                    state.status = ResourceStatus::Unavailable;
                    state.last_check = Utc::now();
                    state.error_message = Some(e.message);
                    return Ok(ResourceStatus::Unavailable);
                }
            },
        };
        let mut state = entry.state.lock();
        state.status = status;
        state.last_check = Utc::now();
        Ok(status)
    }

    /// Start a resource via its adapter, then poll health a bounded number
    /// of times. Idempotent: an already-healthy resource succeeds without
    /// work.
    #[instrument(skip(self), err)]
    pub async fn start(&self, name: &str) -> Result<bool> {
        let entry = self.entry(name)?;
        let _lifecycle = entry.lifecycle.lock().await;

        if self.check(name).await? == ResourceStatus::Healthy {
            return Ok(true);
        }

        let Some(adapter) = self.adapter_for(entry.spec.kind) else {
            tracing::warn!(resource = %name, kind = %entry.spec.kind, "no adapter; cannot start");
            return Ok(false);
        };

        entry.state.lock().status = ResourceStatus::Starting;
        let started = match adapter.start(&entry.spec).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(resource = %name, error = %e, "adapter start failed");
                let mut state = entry.state.lock();
                state.status = ResourceStatus::Unavailable;
                state.error_message = Some(e.message);
                return Ok(false);
            }
        };
        if !started {
            entry.state.lock().status = ResourceStatus::Unavailable;
            return Ok(false);
        }

        for attempt in 0..entry.spec.start_poll_attempts {
            if self.check(name).await? == ResourceStatus::Healthy {
                tracing::info!(resource = %name, attempts = attempt + 1, "resource healthy after start");
                return Ok(true);
            }
            tokio::time::sleep(Duration::from_millis(entry.spec.start_poll_interval_ms)).await;
        }
        tracing::error!(
            resource = %name,
            attempts = entry.spec.start_poll_attempts,
            "resource failed to become healthy after start"
        );
        Ok(false)
    }

    #[instrument(skip(self), err)]
    pub async fn stop(&self, name: &str) -> Result<bool> {
        let entry = self.entry(name)?;
        let _lifecycle = entry.lifecycle.lock().await;

        entry.state.lock().status = ResourceStatus::Stopping;
        let Some(adapter) = self.adapter_for(entry.spec.kind) else {
            return Ok(false);
        };
        match adapter.stop(&entry.spec).await {
            Ok(stopped) => {
                if stopped {
                    entry.state.lock().status = ResourceStatus::Unavailable;
                }
                Ok(stopped)
            }
            Err(e) => {
                tracing::error!(resource = %name, error = %e, "adapter stop failed");
                entry.state.lock().error_message = Some(e.message);
                Ok(false)
            }
        }
    }

    /// Current view of every registered resource.
    #[must_use]
    pub fn get_status(&self) -> FxHashMap<String, ManagedResource> {
        self.entries
            .lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state.lock().clone()))
            .collect()
    }

    /// Resources a strategy depends on, derived from its action types via
    /// the configured action-requirements mapping.
    #[must_use]
    pub fn required_resources_for(&self, doc: &StrategyDoc) -> BTreeSet<String> {
        let mut required = BTreeSet::new();
        for step in &doc.steps {
            if let Some(names) = self.action_requirements.get(&step.action.action_type) {
                required.extend(names.iter().cloned());
            }
        }
        required
    }

    /// For every resource flagged required: check health, auto-start when
    /// configured, and report the outcome per resource.
    #[instrument(skip(self))]
    pub async fn ensure_required(&self) -> FxHashMap<String, bool> {
        let required: Vec<(String, bool)> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.spec.required)
            .map(|e| (e.spec.name.clone(), e.spec.auto_start))
            .collect();

        let mut results = FxHashMap::default();
        for (name, auto_start) in required {
            let status = self.check(&name).await.unwrap_or(ResourceStatus::Unknown);
            let ok = if status == ResourceStatus::Healthy {
                true
            } else if auto_start {
                tracing::info!(resource = %name, "auto-starting required resource");
                self.start(&name).await.unwrap_or(false)
            } else {
                tracing::error!(
                    resource = %name,
                    %status,
                    "required resource unavailable and auto_start disabled"
                );
                false
            };
            results.insert(name, ok);
        }
        results
    }

    /// Spawn one supervisor task per resource with a positive health-check
    /// interval. Idempotent per call site; supervisors stop on
    /// [`shutdown`](Self::shutdown).
    pub fn initialize(self: &Arc<Self>) {
        let names: Vec<String> = self.entries.lock().keys().cloned().collect();
        let mut supervisors = self.supervisors.lock();
        for name in names {
            let manager = Arc::clone(self);
            let handle = tokio::spawn(async move {
                manager.supervise(&name).await;
            });
            supervisors.push(handle);
        }
    }

    /// Cancel and reap all supervisors.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.supervisors.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Background loop for one resource: periodic probe, restart on
    /// healthy-to-unhealthy transitions of auto-start resources, bounded by
    /// consecutive-failure budget that resets on recovery.
    async fn supervise(&self, name: &str) {
        let Ok(entry) = self.entry(name) else { return };
        if entry.spec.health_check_interval_secs == 0 {
            return;
        }
        let interval = Duration::from_secs(entry.spec.health_check_interval_secs);
        let mut retry_count: u32 = 0;
        let mut last_status = entry.state.lock().status;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    tracing::debug!(resource = %name, "supervisor cancelled");
                    return;
                }
                () = tokio::time::sleep(interval) => {}
            }

            let status = match self.check(name).await {
                Ok(status) => status,
                Err(_) => return,
            };

            if status != last_status {
                tracing::info!(resource = %name, from = %last_status, to = %status, "resource status changed");
            }

            if status == ResourceStatus::Unavailable && entry.spec.auto_start {
                retry_count += 1;
                if retry_count <= entry.spec.max_retries {
                    tracing::warn!(
                        resource = %name,
                        retry = retry_count,
                        max = entry.spec.max_retries,
                        "resource unavailable, attempting restart"
                    );
                    if self.start(name).await.unwrap_or(false) {
                        retry_count = 0;
                    }
                } else if status != last_status {
                    tracing::error!(
                        resource = %name,
                        retries = entry.spec.max_retries,
                        "resource failed after max restart retries"
                    );
                }
            } else if status == ResourceStatus::Healthy {
                retry_count = 0;
            }

            last_status = status;
        }
    }
}
