//! # Ontoflow: Strategy Execution Engine for Identifier Mapping
//!
//! Ontoflow turns a declarative *strategy* — an ordered pipeline of actions
//! such as "load identifiers", "execute a mapping path", "export results" —
//! into a durable, resumable, observable *job* that can run for seconds or
//! hours, survive restarts, tolerate flaky upstream dependencies, and
//! stream progress to external observers.
//!
//! ## Core concepts
//!
//! - **Jobs**: one execution of a strategy, persisted through a strict
//!   status state machine ([`types::JobStatus`])
//! - **Checkpoints**: durable snapshots of the execution context that make
//!   pause/resume and crash recovery possible
//! - **Mapping paths**: ordered chains of identifier-mapping resources,
//!   executed in concurrent batches with provenance tracking
//! - **Entity-mapping cache**: at-most-one-compute memoization of mapping
//!   results with derived confidence scores
//! - **Managed resources**: health-monitored external dependencies (vector
//!   stores, HTTP APIs, containers) gating job execution
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ontoflow::actions::ActionRegistry;
//! use ontoflow::engine::{ExecutionEngine, JobService};
//! use ontoflow::events::EventBus;
//! use ontoflow::persistence::{ExecutionOptions, PersistenceService};
//! use ontoflow::resources::{ResourceConfigDoc, ResourceManager};
//! use ontoflow::storage::FileSystemStorage;
//! use ontoflow::strategy::StrategyDoc;
//!
//! # async fn example(doc: StrategyDoc) -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(FileSystemStorage::new("ontoflow_storage").await?);
//! let persistence =
//!     Arc::new(PersistenceService::connect("sqlite://ontoflow.db", storage).await?);
//! let registry = Arc::new(ActionRegistry::builder().build());
//! let resources = ResourceManager::from_config(ResourceConfigDoc::default())?;
//!
//! let engine = ExecutionEngine::new(persistence, registry, resources, EventBus::default());
//! let service = JobService::new(engine);
//!
//! let job_id = service
//!     .submit(doc, serde_json::json!({}), ExecutionOptions::default(), None, vec![], None)
//!     .await?;
//! println!("submitted job {job_id}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`strategy`] - Parsed strategy documents and the condition dialect
//! - [`context`] - The live per-job execution context
//! - [`persistence`] - Durable store for jobs, steps, checkpoints, results
//! - [`storage`] - Opaque blob storage for oversize payloads
//! - [`resources`] - Managed external dependencies
//! - [`cache`] - Mapping-result memoization
//! - [`paths`] - Mapping-path model and batched runner
//! - [`actions`] - The action contract and registry
//! - [`events`] - Job event hub, bus, and sinks
//! - [`engine`] - The orchestrator and submission boundary

pub mod actions;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod paths;
pub mod persistence;
pub mod resources;
pub mod sessions;
pub mod storage;
pub mod strategy;
pub mod types;

pub use config::EngineConfig;
pub use error::EngineError;
