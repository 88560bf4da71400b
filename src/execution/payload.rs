use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::query::{Query, QueryStatus};
use crate::cache::Fingerprint;
use crate::data::{ColumnMeta, NormalizedResult};

/// Informational message on a successful query that returned no rows
pub const NO_DATA_MESSAGE: &str = "No data";

/// Returned on submit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueryHandle {
    pub id: Uuid,
    pub status: QueryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub id: Uuid,
    pub status: QueryStatus,
    pub progress: u8,
    pub rows_so_far: usize,
    pub error: Option<String>,
}

impl From<&Query> for StatusReport {
    fn from(query: &Query) -> Self {
        Self {
            id: query.id,
            status: query.status,
            progress: query.progress,
            rows_so_far: query.rows,
            error: query.error.clone(),
        }
    }
}

/// What a caller receives for a query
#[derive(Debug, Clone, Serialize)]
pub struct QueryPayload {
    pub query_id: Uuid,
    pub status: QueryStatus,
    pub data: Vec<serde_json::Value>,
    pub columns: Vec<ColumnMeta>,
    /// Rendered SQL
    pub query: Option<String>,
    pub error: Option<String>,
    pub no_data: bool,
    pub is_cached: bool,
    pub cache_key: Option<Fingerprint>,
    pub rowcount: usize,
    #[serde(skip)]
    pub result: Option<Arc<NormalizedResult>>,
}

impl QueryPayload {
    pub fn new(query: &Query, result: Option<Arc<NormalizedResult>>) -> Self {
        let result = result.filter(|_| query.status == QueryStatus::Success);
        let (data, columns) = match &result {
            Some(r) => (
                r.records.iter().map(|record| record.to_json()).collect(),
                r.columns.clone(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        let no_data = query.status == QueryStatus::Success && data.is_empty();
        let error = if no_data {
            Some(NO_DATA_MESSAGE.to_string())
        } else {
            query.error.clone()
        };

        Self {
            query_id: query.id,
            status: query.status,
            rowcount: data.len(),
            data,
            columns,
            query: query.sql.clone(),
            error,
            no_data,
            is_cached: query.is_cached,
            cache_key: query.cache_key.clone(),
            result,
        }
    }
}

/// What to pre-compute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmUpTarget {
    /// Re-run an earlier query's request
    Query(Uuid),
    /// Default query of every datasource on a table
    Dataset { database: String, table: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarmedEntry {
    pub datasource_id: Option<i64>,
    pub datasource_name: Option<String>,
    pub cache_key: Option<Fingerprint>,
    pub status: QueryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{NormalizedRecord, Value};

    #[test]
    fn test_empty_success_is_no_data() {
        let mut query = Query::new(None);
        query.transition(QueryStatus::Success).unwrap();
        let payload = QueryPayload::new(&query, Some(Arc::new(NormalizedResult::default())));

        assert!(payload.no_data);
        assert_eq!(payload.error.as_deref(), Some("No data"));
        assert_eq!(payload.status, QueryStatus::Success);
    }

    #[test]
    fn test_success_with_rows() {
        let mut query = Query::new(None);
        query.transition(QueryStatus::Success).unwrap();
        let record: NormalizedRecord = vec![("name".to_string(), Value::String("Jennifer".into()))]
            .into_iter()
            .collect();
        let result = NormalizedResult {
            columns: Vec::new(),
            records: vec![record],
        };
        let payload = QueryPayload::new(&query, Some(Arc::new(result)));

        assert!(!payload.no_data);
        assert!(payload.error.is_none());
        assert_eq!(payload.data[0]["name"], "Jennifer");
    }

    #[test]
    fn test_failure_keeps_its_error() {
        let mut query = Query::new(None);
        query.error = Some("Column 'nope' does not exist".into());
        query.transition(QueryStatus::Failed).unwrap();
        let payload = QueryPayload::new(&query, None);

        assert!(!payload.no_data);
        assert_eq!(payload.error.as_deref(), Some("Column 'nope' does not exist"));
        assert!(payload.data.is_empty());
    }

    #[test]
    fn test_warm_up_target_shape() {
        let target: WarmUpTarget =
            serde_json::from_str(r#"{"dataset": {"database": "examples", "table": "birth_names"}}"#).unwrap();
        assert_eq!(
            target,
            WarmUpTarget::Dataset {
                database: "examples".into(),
                table: "birth_names".into()
            }
        );
    }
}
