use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::data::{DataType, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Row has {got} values, table '{table}' has {expected} columns")]
    ArityMismatch {
        table: String,
        expected: usize,
        got: usize,
    },

    #[error("Column '{column}' expects {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        got: String,
    },
}

/// A row-oriented in-memory table with a fixed schema
#[derive(Debug)]
pub struct MemTable {
    pub name: String,
    columns: Vec<(String, DataType)>,
    rows: RwLock<Vec<Vec<Value>>>,
}

impl MemTable {
    pub fn new(name: impl Into<String>, columns: Vec<(String, DataType)>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn columns(&self) -> &[(String, DataType)] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Append one row; integers widen into DOUBLE columns
    pub fn insert_row(&self, row: Vec<Value>) -> Result<(), StoreError> {
        if row.len() != self.columns.len() {
            return Err(StoreError::ArityMismatch {
                table: self.name.clone(),
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        let row = row
            .into_iter()
            .zip(&self.columns)
            .map(|(value, (column, data_type))| conform(value, column, *data_type))
            .collect::<Result<Vec<_>, _>>()?;
        self.rows.write().push(row);
        Ok(())
    }

    /// Append a JSON object row; missing keys are null
    pub fn insert_json(&self, row: &serde_json::Map<String, serde_json::Value>) -> Result<(), StoreError> {
        let values = self
            .columns
            .iter()
            .map(|(column, data_type)| {
                let json = row.get(column).unwrap_or(&serde_json::Value::Null);
                data_type
                    .value_from_json(json)
                    .ok_or_else(|| StoreError::TypeMismatch {
                        column: column.clone(),
                        expected: *data_type,
                        got: json.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.rows.write().push(values);
        Ok(())
    }

    /// Copy of the current rows
    pub fn snapshot(&self) -> Vec<Vec<Value>> {
        self.rows.read().clone()
    }
}

fn conform(value: Value, column: &str, data_type: DataType) -> Result<Value, StoreError> {
    let ok = match (&value, data_type) {
        (Value::Null, _) => true,
        (Value::Int64(i), DataType::Double) => return Ok(Value::Float64(*i as f64)),
        (other, expected) => DataType::from_value(other) == expected,
    };
    if ok {
        Ok(value)
    } else {
        Err(StoreError::TypeMismatch {
            column: column.to_string(),
            expected: data_type,
            got: value.type_name().to_string(),
        })
    }
}

/// Tables of one in-memory database; names are case-insensitive
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: DashMap<String, Arc<MemTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, name: &str, columns: Vec<(String, DataType)>) -> Result<Arc<MemTable>, StoreError> {
        let key = name.to_lowercase();
        if self.tables.contains_key(&key) {
            return Err(StoreError::TableExists(name.to_string()));
        }
        let table = Arc::new(MemTable::new(name, columns));
        self.tables.insert(key, Arc::clone(&table));
        Ok(table)
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<MemTable>> {
        self.tables.get(&name.to_lowercase()).map(|t| Arc::clone(&t))
    }

    pub fn drop_table(&self, name: &str) -> Result<(), StoreError> {
        if self.tables.remove(&name.to_lowercase()).is_none() {
            return Err(StoreError::TableNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.value().name.clone()).collect();
        names.sort();
        names
    }

    pub fn insert(&self, table: &str, row: Vec<Value>) -> Result<(), StoreError> {
        self.get_table(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?
            .insert_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table(
                "ab_user",
                vec![
                    ("first_name".into(), DataType::Varchar),
                    ("score".into(), DataType::Double),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_create_and_insert() {
        let store = users();
        store
            .insert("AB_USER", vec![Value::String("admin".into()), Value::Int64(3)])
            .unwrap();

        let table = store.get_table("ab_user").unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.snapshot()[0][1], Value::Float64(3.0));
        assert_eq!(store.list_tables(), vec!["ab_user"]);
    }

    #[test]
    fn test_schema_is_enforced() {
        let store = users();
        assert!(matches!(
            store.insert("ab_user", vec![Value::Int64(1), Value::Null]),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            store.insert("ab_user", vec![Value::Null]),
            Err(StoreError::ArityMismatch { expected: 2, got: 1, .. })
        ));
        assert_eq!(
            store.create_table("AB_User", Vec::new()).unwrap_err(),
            StoreError::TableExists("AB_User".into())
        );
    }

    #[test]
    fn test_insert_json() {
        let store = users();
        let table = store.get_table("ab_user").unwrap();
        let row = serde_json::json!({"first_name": "admin"});
        table.insert_json(row.as_object().unwrap()).unwrap();
        assert_eq!(table.snapshot()[0], vec![Value::String("admin".into()), Value::Null]);
    }
}
