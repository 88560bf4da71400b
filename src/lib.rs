//! Tessera: query execution and normalization core for ad-hoc BI aggregations
//!
//! A structured [`QueryObject`] (datasource, metrics, group-by columns, filters,
//! time range) or a templated SQL string is rendered into backend SQL through a
//! per-dialect [`EngineSpec`], fingerprinted, served from a result cache or
//! dispatched once to a [`Backend`], and normalized into canonical records.
//!
//! # Features
//!
//! - **Engine specs**: type mapping, identifier quoting, time grains, row limits
//! - **Sandboxed templates**: `{{ datetime(2017, 1, 1).isoformat() }}` in SQL
//! - **Deterministic cache keys**: one fingerprint per semantic query
//! - **Single-flight execution**: concurrent identical requests share one dispatch
//! - **Lifecycle tracking**: poll, cancel and time out queries by id
//! - **Embedded backend**: an in-memory SQL database for fixtures and tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera::backend::MemoryBackend;
//! use tessera::execution::{QueryExecutor, SubmitOptions};
//! use tessera::query::{Database, DatasourceRef, QueryObject, StaticCatalog};
//!
//! # async fn run() {
//! let catalog = StaticCatalog::new();
//! catalog.add_database(Database::new(1, "examples", "memory", "memory://examples"));
//! let executor = QueryExecutor::builder(Arc::new(catalog))
//!     .with_backend("memory", Arc::new(MemoryBackend::new()))
//!     .build();
//!
//! let object = QueryObject::new(DatasourceRef::table(3))
//!     .with_groupby(["name"])
//!     .with_metrics(["count"]);
//! let payload = executor.execute(object, SubmitOptions::new()).await.unwrap();
//! println!("{:?}", payload.data);
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod data;
pub mod engine;
pub mod execution;
pub mod export;
pub mod fixture;
pub mod normalize;
pub mod query;
pub mod template;

// Re-export commonly used types
pub use backend::{Backend, BackendError};
pub use config::CoreConfig;
pub use data::{NormalizedResult, Value};
pub use engine::{EngineSpec, EngineSpecRegistry};
pub use execution::{QueryExecutor, QueryPayload, QueryStatus, SqlRequest, SubmitOptions};
pub use query::{QueryObject, RenderError};
