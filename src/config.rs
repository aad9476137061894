//! Environment-driven engine configuration.
//!
//! Reads `.env` (via dotenvy) then the process environment. Every knob has
//! a default so a bare environment yields a working local setup.

use serde_json::Value;

use crate::persistence::{DEFAULT_COMPRESS_THRESHOLD, DEFAULT_MAX_INLINE};
use crate::resources::ResourceConfigDoc;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// SQLite URL, e.g. `sqlite://ontoflow.db`.
    pub database_url: String,
    /// Base directory for external checkpoint/result blobs.
    pub storage_dir: String,
    /// Serialized payloads below this stay inline in their row.
    pub max_inline_bytes: usize,
    /// Payloads above this are zlib-compressed.
    pub compress_threshold_bytes: usize,
    pub default_timeout_seconds: u64,
    pub default_retry_attempts: u32,
    pub default_batch_size: usize,
    pub max_concurrent_batches: usize,
    /// Parsed resource-configuration document.
    pub resources: ResourceConfigDoc,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ontoflow.db".to_string(),
            storage_dir: "ontoflow_storage".to_string(),
            max_inline_bytes: DEFAULT_MAX_INLINE,
            compress_threshold_bytes: DEFAULT_COMPRESS_THRESHOLD,
            default_timeout_seconds: 3600,
            default_retry_attempts: 3,
            default_batch_size: 250,
            max_concurrent_batches: 5,
            resources: ResourceConfigDoc::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment.
    ///
    /// Recognized variables: `ONTOFLOW_DATABASE_URL`, `ONTOFLOW_STORAGE_DIR`,
    /// `ONTOFLOW_MAX_INLINE`, `ONTOFLOW_COMPRESS_THRESHOLD`,
    /// `ONTOFLOW_JOB_TIMEOUT_SECS`, `ONTOFLOW_RETRY_ATTEMPTS`,
    /// `ONTOFLOW_BATCH_SIZE`, `ONTOFLOW_MAX_CONCURRENT_BATCHES`, and
    /// `ONTOFLOW_RESOURCES` (inline JSON resource document) or
    /// `ONTOFLOW_RESOURCES_FILE` (path to one).
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(url) = std::env::var("ONTOFLOW_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(dir) = std::env::var("ONTOFLOW_STORAGE_DIR") {
            config.storage_dir = dir;
        }
        if let Some(v) = env_parse("ONTOFLOW_MAX_INLINE") {
            config.max_inline_bytes = v;
        }
        if let Some(v) = env_parse("ONTOFLOW_COMPRESS_THRESHOLD") {
            config.compress_threshold_bytes = v;
        }
        if let Some(v) = env_parse("ONTOFLOW_JOB_TIMEOUT_SECS") {
            config.default_timeout_seconds = v;
        }
        if let Some(v) = env_parse("ONTOFLOW_RETRY_ATTEMPTS") {
            config.default_retry_attempts = v;
        }
        if let Some(v) = env_parse("ONTOFLOW_BATCH_SIZE") {
            config.default_batch_size = v;
        }
        if let Some(v) = env_parse("ONTOFLOW_MAX_CONCURRENT_BATCHES") {
            config.max_concurrent_batches = v;
        }

        if let Some(doc) = load_resource_doc() {
            config.resources = doc;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, raw, "unparseable environment value ignored");
            None
        }
    })
}

fn load_resource_doc() -> Option<ResourceConfigDoc> {
    let raw = if let Ok(inline) = std::env::var("ONTOFLOW_RESOURCES") {
        inline
    } else if let Ok(path) = std::env::var("ONTOFLOW_RESOURCES_FILE") {
        match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(path, error = %e, "resource config file unreadable");
                return None;
            }
        }
    } else {
        return None;
    };

    match serde_json::from_str::<Value>(&raw).and_then(serde_json::from_value) {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!(error = %e, "resource config document failed to parse");
            None
        }
    }
}
