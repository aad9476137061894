//! Resource adapters: the probe/start/stop seam per resource type.
//!
//! The crate ships an HTTP probe (external APIs) and a static adapter
//! (databases/filesystems that are managed externally). Container and
//! vector-store runtimes are injected by the embedder behind the same
//! trait; the manager only depends on the contract.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::{ResourceSpec, ResourceStatus};

#[derive(Debug, Error)]
#[error("adapter error: {message}")]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Contract for type-specific health probes and lifecycle control.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Probe current health.
    async fn check(&self, spec: &ResourceSpec) -> Result<ResourceStatus, AdapterError>;

    /// Attempt to start the resource. Returns `false` for adapter types
    /// that cannot start anything. Must be idempotent: an already-running
    /// resource is success without work.
    async fn start(&self, _spec: &ResourceSpec) -> Result<bool, AdapterError> {
        Ok(false)
    }

    /// Attempt to stop the resource; symmetric with `start`.
    async fn stop(&self, _spec: &ResourceSpec) -> Result<bool, AdapterError> {
        Ok(false)
    }
}

/// HTTP health probe for [`ResourceKind::ExternalHttpApi`] resources.
///
/// GETs the configured `health_url` (falling back to `base_url`):
/// 2xx is Healthy, 5xx is Degraded, connection errors and timeouts are
/// Unavailable.
///
/// [`ResourceKind::ExternalHttpApi`]: super::ResourceKind::ExternalHttpApi
pub struct HttpProbeAdapter {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbeAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn probe_url(spec: &ResourceSpec) -> Option<String> {
        spec.config
            .get("health_url")
            .or_else(|| spec.config.get("base_url"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

impl Default for HttpProbeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceAdapter for HttpProbeAdapter {
    async fn check(&self, spec: &ResourceSpec) -> Result<ResourceStatus, AdapterError> {
        let Some(url) = Self::probe_url(spec) else {
            tracing::warn!(resource = %spec.name, "no health_url/base_url configured");
            return Ok(ResourceStatus::Unknown);
        };
        let timeout = spec
            .config
            .get("timeout_secs")
            .and_then(serde_json::Value::as_u64)
            .map_or(self.timeout, Duration::from_secs);

        match self.client.get(&url).timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Ok(ResourceStatus::Healthy)
                } else if status.is_server_error() {
                    Ok(ResourceStatus::Degraded)
                } else {
                    Ok(ResourceStatus::Unavailable)
                }
            }
            Err(e) if e.is_timeout() => {
                tracing::debug!(resource = %spec.name, url, "health probe timed out");
                Ok(ResourceStatus::Unavailable)
            }
            Err(e) => {
                tracing::debug!(resource = %spec.name, url, error = %e, "health probe failed");
                Ok(ResourceStatus::Unavailable)
            }
        }
    }
}

/// Adapter for resources whose lifecycle lives outside the engine.
/// Reports a fixed status (Healthy by default) unless the embedder swaps
/// in a real probe.
pub struct StaticAdapter {
    status: ResourceStatus,
}

impl StaticAdapter {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: ResourceStatus::Healthy,
        }
    }

    #[must_use]
    pub fn fixed(status: ResourceStatus) -> Self {
        Self { status }
    }
}

#[async_trait]
impl ResourceAdapter for StaticAdapter {
    async fn check(&self, _spec: &ResourceSpec) -> Result<ResourceStatus, AdapterError> {
        Ok(self.status)
    }
}
