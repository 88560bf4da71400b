use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::query::QueryObject;
use crate::template::TemplateContext;

/// Ad-hoc SQL against a named database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlRequest {
    pub database: String,
    pub sql: String,
    #[serde(default)]
    pub template_params: BTreeMap<String, serde_json::Value>,
}

impl SqlRequest {
    pub fn new(database: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            sql: sql.into(),
            template_params: BTreeMap::new(),
        }
    }

    pub fn with_template_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.template_params.insert(name.into(), value);
        self
    }
}

/// What a query was submitted with; kept so it can be re-run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryRequest {
    Sql(SqlRequest),
    Object(Box<QueryObject>),
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub client_id: Option<String>,
    /// Overrides the configured query timeout
    pub timeout: Option<Duration>,
    /// Skip the cache lookup (the result is still cached)
    pub force: bool,
    pub template_context: TemplateContext,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_template_context(mut self, context: TemplateContext) -> Self {
        self.template_context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shapes() {
        let sql: QueryRequest = serde_json::from_str(r#"{"database": "examples", "sql": "SELECT 1"}"#).unwrap();
        assert_eq!(sql, QueryRequest::Sql(SqlRequest::new("examples", "SELECT 1")));

        let object: QueryRequest =
            serde_json::from_str(r#"{"datasource": "3__table", "metrics": ["count"], "groupby": ["name"]}"#).unwrap();
        assert!(matches!(object, QueryRequest::Object(_)));
    }
}
