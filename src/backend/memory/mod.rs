//! Embedded in-memory SQL backend
//!
//! Databases are matched by name. Each holds a [`MemoryStore`] of typed
//! tables and answers single-table SELECTs with filters, grouping, the five
//! basic aggregates, ordering and limits.

pub mod aggregates;
pub mod executor;
pub mod parser;
pub mod store;

pub use executor::{ExecuteError, Relation};
pub use store::{MemTable, MemoryStore, StoreError};

use async_trait::async_trait;
use dashmap::DashMap;
use sqlparser::dialect::GenericDialect;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{Backend, BackendError, BackendRequest, CancelSignal, ProgressReporter, RawResultSet};
use crate::data::RawValue;
use crate::normalize::{ColumnDescriptor, RawRows};

impl From<ExecuteError> for BackendError {
    fn from(e: ExecuteError) -> Self {
        match e {
            ExecuteError::Parse(_) | ExecuteError::TableNotFound(_) | ExecuteError::ColumnNotFound(_) => {
                BackendError::Syntax(e.to_string())
            }
            other => BackendError::Execution(other.to_string()),
        }
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    stores: DashMap<String, Arc<MemoryStore>>,
    latency: Option<Duration>,
    dispatched: AtomicU64,
    running: Arc<DashMap<String, CancelSignal>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(self, database: &str, store: MemoryStore) -> Self {
        self.stores.insert(database.to_string(), Arc::new(store));
        self
    }

    /// Artificial delay before each query runs
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store for `database`, created empty on first use
    pub fn store(&self, database: &str) -> Arc<MemoryStore> {
        Arc::clone(
            &self
                .stores
                .entry(database.to_string())
                .or_insert_with(|| Arc::new(MemoryStore::new())),
        )
    }

    /// Number of queries that reached this backend
    pub fn dispatch_count(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }
}

/// Unregisters a tracking handle when the call ends
struct RunningGuard {
    running: Arc<DashMap<String, CancelSignal>>,
    handle: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.remove(&self.handle);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn execute(&self, request: BackendRequest, progress: ProgressReporter) -> Result<RawResultSet, BackendError> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        self.running
            .insert(request.tracking_handle.clone(), request.cancel.clone());
        let _guard = RunningGuard {
            running: Arc::clone(&self.running),
            handle: request.tracking_handle.clone(),
        };

        let store = self
            .stores
            .get(&request.database.name)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| BackendError::Connection(format!("unknown database '{}'", request.database.name)))?;

        if let Some(latency) = self.latency {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = request.cancel.cancelled() => return Err(BackendError::Cancelled),
            }
        }
        if request.cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        debug!(
            database = %request.database.name,
            handle = %request.tracking_handle,
            "Executing in-memory query"
        );
        progress.report(0, 0);

        let sql = request.sql.clone();
        let work = tokio::task::spawn_blocking(move || executor::execute(&store, &sql, &GenericDialect {}));
        let relation = tokio::select! {
            joined = work => joined.map_err(|e| BackendError::Execution(e.to_string()))??,
            _ = request.cancel.cancelled() => return Err(BackendError::Cancelled),
        };

        progress.report(100, relation.row_count());
        info!(
            database = %request.database.name,
            rows = relation.row_count(),
            "In-memory query complete"
        );

        let columns = relation
            .columns
            .iter()
            .map(|(name, data_type)| ColumnDescriptor::new(name.clone(), Some(data_type.type_tag())))
            .collect();
        let rows = relation
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(RawValue::from).collect())
            .collect();

        Ok(RawResultSet {
            columns,
            rows: RawRows::Tuples(rows),
        })
    }

    async fn cancel(&self, tracking_handle: &str) -> Result<(), BackendError> {
        if let Some(signal) = self.running.get(tracking_handle) {
            debug!(handle = %tracking_handle, "Cancelling in-memory query");
            signal.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataType, Value};
    use crate::query::Database;

    fn backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let store = backend.store("examples");
        store
            .create_table("t", vec![("a".into(), DataType::Bigint), ("b".into(), DataType::Varchar)])
            .unwrap();
        store.insert("t", vec![Value::Int64(1), Value::String("x".into())]).unwrap();
        backend
    }

    fn request(database: &str, sql: &str) -> BackendRequest {
        BackendRequest {
            database: Arc::new(Database::new(1, database, "memory", "memory://")),
            sql: sql.into(),
            tracking_handle: "handle-1".into(),
            cancel: CancelSignal::new(),
        }
    }

    #[tokio::test]
    async fn test_execute_returns_tagged_columns() {
        let backend = backend();
        let result = backend
            .execute(request("examples", "SELECT a, b FROM t"), ProgressReporter::noop())
            .await
            .unwrap();

        assert_eq!(result.columns[0], ColumnDescriptor::new("a", Some("BIGINT")));
        assert_eq!(
            result.rows,
            RawRows::Tuples(vec![vec![RawValue::Int(1), RawValue::Text("x".into())]])
        );
        assert_eq!(backend.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let backend = backend();
        let missing_db = backend
            .execute(request("nowhere", "SELECT 1"), ProgressReporter::noop())
            .await;
        assert!(matches!(missing_db, Err(BackendError::Connection(_))));

        let bad_column = backend
            .execute(request("examples", "SELECT nope FROM t"), ProgressReporter::noop())
            .await;
        assert!(matches!(bad_column, Err(BackendError::Syntax(_))));
    }

    #[tokio::test]
    async fn test_cancel_by_handle() {
        let backend = Arc::new(backend().with_latency(Duration::from_secs(5)));
        let running = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move {
                backend
                    .execute(request("examples", "SELECT a FROM t"), ProgressReporter::noop())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.cancel("handle-1").await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(BackendError::Cancelled));
        assert!(backend.running.is_empty());
    }
}
