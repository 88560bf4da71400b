//! JSON fixtures: databases, tables with rows, and datasets over them
//!
//! ```json
//! {
//!   "databases": [{"id": 1, "name": "examples", "backend": "memory"}],
//!   "tables": [{"database": "examples", "name": "birth_names",
//!               "columns": [["ds", "TIMESTAMP"], ["name", "VARCHAR"]],
//!               "rows": [{"ds": "2017-01-01 00:00:00", "name": "Jennifer"}]}],
//!   "datasets": [{"id": 3, "database_id": 1, "table": "birth_names",
//!                 "main_dttm_col": "ds"}]
//! }
//! ```

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::backend::memory::{MemoryBackend, StoreError};
use crate::data::DataType;
use crate::query::{ColumnDef, Database, Datasource, DatasourceCatalog, MetricDef, StaticCatalog};

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Failed to read fixture: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid fixture: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Table '{table}' references unknown database '{database}'")]
    UnknownDatabase { table: String, database: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
struct DatabaseDef {
    id: i64,
    name: String,
    #[serde(default = "default_backend")]
    backend: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    allow_dml: bool,
    #[serde(default)]
    cache_timeout_secs: Option<u64>,
}

fn default_backend() -> String {
    "memory".to_string()
}

#[derive(Debug, Deserialize)]
struct TableDef {
    database: String,
    name: String,
    columns: Vec<(String, DataType)>,
    #[serde(default)]
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct DatasetDef {
    id: i64,
    database_id: i64,
    table: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    columns: Vec<ColumnDef>,
    #[serde(default)]
    metrics: Vec<MetricDef>,
    #[serde(default)]
    main_dttm_col: Option<String>,
    #[serde(default)]
    cache_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    databases: Vec<DatabaseDef>,
    tables: Vec<TableDef>,
    datasets: Vec<DatasetDef>,
}

/// Catalog and embedded backend built from a fixture
pub struct Loaded {
    pub catalog: Arc<StaticCatalog>,
    pub backend: Arc<MemoryBackend>,
}

impl Fixture {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(self) -> Result<Loaded, FixtureError> {
        let catalog = StaticCatalog::new();
        let backend = MemoryBackend::new();

        for def in self.databases {
            let uri = def.uri.unwrap_or_else(|| format!("{}://{}", def.backend, def.name));
            let mut database = Database::new(def.id, def.name, def.backend, uri).with_allow_dml(def.allow_dml);
            if let Some(secs) = def.cache_timeout_secs {
                database = database.with_cache_timeout(Duration::from_secs(secs));
            }
            catalog.add_database(database);
        }

        for def in self.tables {
            if catalog.database_by_name(&def.database).is_none() {
                return Err(FixtureError::UnknownDatabase {
                    table: def.name,
                    database: def.database,
                });
            }
            let table = backend.store(&def.database).create_table(&def.name, def.columns)?;
            for row in &def.rows {
                table.insert_json(row)?;
            }
            info!(database = %def.database, table = %def.name, rows = def.rows.len(), "Fixture table loaded");
        }

        for def in self.datasets {
            let mut datasource = Datasource::new(def.id, def.database_id, def.table)
                .with_columns(def.columns)
                .with_metrics(def.metrics);
            if let Some(name) = def.name {
                datasource.name = name;
            }
            if let Some(sql) = def.sql {
                datasource = datasource.with_sql(sql);
            }
            if let Some(column) = def.main_dttm_col {
                datasource = datasource.with_main_dttm_col(column);
            }
            datasource.cache_timeout = def.cache_timeout_secs.map(Duration::from_secs);
            catalog.add_datasource(datasource);
        }

        Ok(Loaded {
            catalog: Arc::new(catalog),
            backend: Arc::new(backend),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::DatasourceRef;
    use std::io::Write;

    const BIRTH_NAMES: &str = r#"{
        "databases": [{"id": 1, "name": "examples", "backend": "memory"}],
        "tables": [{
            "database": "examples",
            "name": "birth_names",
            "columns": [["ds", "TIMESTAMP"], ["name", "VARCHAR"], ["num", "BIGINT"]],
            "rows": [
                {"ds": "2017-01-01 00:00:00", "name": "Jennifer", "num": 10},
                {"ds": "2017-01-03 00:00:00", "name": "Aaron", "num": 4}
            ]
        }],
        "datasets": [{
            "id": 3,
            "database_id": 1,
            "table": "birth_names",
            "metrics": [{"name": "sum__num", "expression": "SUM(num)"}],
            "main_dttm_col": "ds"
        }]
    }"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BIRTH_NAMES.as_bytes()).unwrap();

        let loaded = Fixture::from_path(file.path()).unwrap().load().unwrap();
        let database = loaded.catalog.database_by_name("examples").unwrap();
        assert_eq!(database.backend, "memory");
        assert_eq!(database.connection.masked_uri(), "memory://examples");

        let datasource = loaded.catalog.datasource(&DatasourceRef::table(3)).unwrap();
        assert_eq!(datasource.main_dttm_col.as_deref(), Some("ds"));
        assert_eq!(datasource.metric("sum__num").unwrap().expression, "SUM(num)");

        let table = loaded.backend.store("examples").get_table("birth_names").unwrap();
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_table_on_unknown_database() {
        let fixture = Fixture::from_json(
            r#"{"tables": [{"database": "nowhere", "name": "t", "columns": [["a", "BIGINT"]]}]}"#,
        )
        .unwrap();
        assert!(matches!(fixture.load(), Err(FixtureError::UnknownDatabase { .. })));
    }

    #[test]
    fn test_bad_row_is_rejected() {
        let fixture = Fixture::from_json(
            r#"{
                "databases": [{"id": 1, "name": "examples"}],
                "tables": [{"database": "examples", "name": "t",
                            "columns": [["a", "BIGINT"]], "rows": [{"a": "not a number"}]}]
            }"#,
        )
        .unwrap();
        assert!(matches!(fixture.load(), Err(FixtureError::Store(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Fixture::from_path("/definitely/not/here.json"),
            Err(FixtureError::Io(_))
        ));
    }
}
