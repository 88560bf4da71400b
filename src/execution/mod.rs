//! Asynchronous query execution
//!
//! Queries are tracked from submission to a terminal status. Identical
//! requests in flight share a single backend call and successful results are
//! cached under the query fingerprint.

pub mod executor;
pub mod inflight;
pub mod payload;
pub mod query;
pub mod request;
pub mod store;

pub use executor::{default_query, ExecutionError, ExecutorBuilder, ExecutorError, QueryExecutor};
pub use payload::{QueryHandle, QueryPayload, StatusReport, WarmUpTarget, WarmedEntry, NO_DATA_MESSAGE};
pub use query::{Query, QueryStatus, TransitionError};
pub use request::{QueryRequest, SqlRequest, SubmitOptions};
pub use store::QueryStore;
