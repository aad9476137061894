//! Managed external resources: registry, health monitoring, lifecycle.
//!
//! Strategies declare prerequisites indirectly through their action types;
//! the manager maps those to named resources, verifies (and optionally
//! starts) them before a job may run, and keeps a background supervisor per
//! resource that probes health and restarts auto-start resources that go
//! unhealthy.

pub mod adapters;
pub mod manager;

pub use adapters::{AdapterError, HttpProbeAdapter, ResourceAdapter, StaticAdapter};
pub use manager::ResourceManager;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Types of manageable resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ContainerWorkload,
    VectorStore,
    ExternalHttpApi,
    Database,
    Filesystem,
    Compute,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::ContainerWorkload => "container_workload",
            ResourceKind::VectorStore => "vector_store",
            ResourceKind::ExternalHttpApi => "external_http_api",
            ResourceKind::Database => "database",
            ResourceKind::Filesystem => "filesystem",
            ResourceKind::Compute => "compute",
        };
        f.write_str(s)
    }
}

/// Resource health status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Healthy,
    Degraded,
    Unavailable,
    Starting,
    Stopping,
    Unknown,
}

impl ResourceStatus {
    /// Whether a required resource in this state permits job execution.
    /// Degraded is allowed but logged as a warning by the engine.
    #[must_use]
    pub fn permits_execution(&self) -> bool {
        matches!(self, ResourceStatus::Healthy | ResourceStatus::Degraded)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Healthy => "healthy",
            ResourceStatus::Degraded => "degraded",
            ResourceStatus::Unavailable => "unavailable",
            ResourceStatus::Starting => "starting",
            ResourceStatus::Stopping => "stopping",
            ResourceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Configuration for one managed resource, loaded at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Bounded post-start health polling.
    #[serde(default = "default_start_poll_attempts")]
    pub start_poll_attempts: u32,
    #[serde(default = "default_start_poll_interval_ms")]
    pub start_poll_interval_ms: u64,
    /// Type-specific parameters (urls, container image, ports, ...).
    #[serde(default)]
    pub config: Value,
}

fn default_health_interval() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_start_poll_attempts() -> u32 {
    30
}

fn default_start_poll_interval_ms() -> u64 {
    1000
}

/// Live view of a resource under management.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagedResource {
    pub name: String,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    pub last_check: DateTime<Utc>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: FxHashMap<String, Value>,
}

/// The resource-configuration document the engine reads at startup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceConfigDoc {
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Maps action-type names to the resources they depend on, e.g.
    /// semantic-matching actions to the vector store.
    #[serde(default)]
    pub action_requirements: FxHashMap<String, Vec<String>>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ResourceError {
    #[error("unknown resource: {name}")]
    #[diagnostic(
        code(ontoflow::resources::unknown),
        help("Register the resource in the resource-configuration document.")
    )]
    UnknownResource { name: String },

    #[error("invalid config for resource {name}: {message}")]
    #[diagnostic(code(ontoflow::resources::invalid_config))]
    InvalidConfig { name: String, message: String },

    #[error("required resource {name} is unavailable: {message}")]
    #[diagnostic(
        code(ontoflow::resources::unavailable),
        help("Start the resource manually or enable auto_start in its config.")
    )]
    Unavailable { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, ResourceError>;
