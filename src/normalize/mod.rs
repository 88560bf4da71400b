//! Raw driver output to canonical records
//!
//! Backends hand over rows in whatever shape their driver produces. Every
//! shape is read through [`RowAdapter`], so the normalizer only ever asks for
//! "the value at position i" and never depends on a driver type.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::data::{ColumnMeta, NormalizedRecord, NormalizedResult, RawValue, SemanticType};
use crate::engine::{infer_semantic_type, EngineSpec};

/// Column name and backend type tag as reported by a driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_tag: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, type_tag: Option<&str>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.map(str::to_string),
        }
    }

    pub fn untyped(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }
}

/// Positional access to one driver row
pub trait RowAdapter {
    fn width(&self) -> usize;

    /// Value at `index`; positions past the end read as null
    fn value_at(&self, index: usize) -> RawValue;
}

impl RowAdapter for Vec<RawValue> {
    fn width(&self) -> usize {
        self.len()
    }

    fn value_at(&self, index: usize) -> RawValue {
        self.get(index).cloned().unwrap_or(RawValue::Null)
    }
}

impl RowAdapter for [RawValue] {
    fn width(&self) -> usize {
        self.len()
    }

    fn value_at(&self, index: usize) -> RawValue {
        self.get(index).cloned().unwrap_or(RawValue::Null)
    }
}

/// Row object owned by a vendor driver that only exposes indexed getters
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRow {
    cells: Box<[RawValue]>,
}

impl VendorRow {
    pub fn new(cells: impl Into<Box<[RawValue]>>) -> Self {
        Self { cells: cells.into() }
    }

    pub fn get(&self, index: usize) -> Option<&RawValue> {
        self.cells.get(index)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl RowAdapter for VendorRow {
    fn width(&self) -> usize {
        self.len()
    }

    fn value_at(&self, index: usize) -> RawValue {
        self.get(index).cloned().unwrap_or(RawValue::Null)
    }
}

/// Name-keyed row read in descriptor order
pub struct NamedRow<'a> {
    row: &'a HashMap<String, RawValue>,
    columns: &'a [ColumnDescriptor],
}

impl<'a> NamedRow<'a> {
    pub fn new(row: &'a HashMap<String, RawValue>, columns: &'a [ColumnDescriptor]) -> Self {
        Self { row, columns }
    }
}

impl RowAdapter for NamedRow<'_> {
    fn width(&self) -> usize {
        self.columns.len()
    }

    fn value_at(&self, index: usize) -> RawValue {
        self.columns
            .get(index)
            .and_then(|column| self.row.get(&column.name))
            .cloned()
            .unwrap_or(RawValue::Null)
    }
}

/// Rows in one of the shapes drivers produce
#[derive(Debug, Clone, PartialEq)]
pub enum RawRows {
    Tuples(Vec<Vec<RawValue>>),
    Vendor(Vec<VendorRow>),
    Named(Vec<HashMap<String, RawValue>>),
}

impl RawRows {
    pub fn len(&self) -> usize {
        match self {
            RawRows::Tuples(rows) => rows.len(),
            RawRows::Vendor(rows) => rows.len(),
            RawRows::Named(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RawRows {
    fn default() -> Self {
        RawRows::Tuples(Vec::new())
    }
}

/// Make column names unique: repeats get `__1`, `__2`, ...
pub fn dedup_column_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let names: Vec<&str> = names.into_iter().collect();
    let mut taken: HashSet<String> = names.iter().map(|n| n.to_string()).collect();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        let count = seen.entry(name).or_insert(0);
        if *count == 0 {
            *count = 1;
            out.push(name.to_string());
            continue;
        }
        let mut candidate = format!("{}__{}", name, count);
        while taken.contains(&candidate) {
            *count += 1;
            candidate = format!("{}__{}", name, count);
        }
        *count += 1;
        taken.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

pub struct ResultNormalizer<'a> {
    spec: &'a EngineSpec,
}

impl<'a> ResultNormalizer<'a> {
    pub fn new(spec: &'a EngineSpec) -> Self {
        Self { spec }
    }

    pub fn normalize(&self, rows: &RawRows, columns: &[ColumnDescriptor]) -> NormalizedResult {
        match rows {
            RawRows::Tuples(rows) => self.normalize_adapters(rows, columns),
            RawRows::Vendor(rows) => self.normalize_adapters(rows, columns),
            RawRows::Named(rows) => {
                let adapters: Vec<NamedRow<'_>> =
                    rows.iter().map(|row| NamedRow::new(row, columns)).collect();
                self.normalize_adapters(&adapters, columns)
            }
        }
    }

    pub fn normalize_adapters<R: RowAdapter>(
        &self,
        rows: &[R],
        columns: &[ColumnDescriptor],
    ) -> NormalizedResult {
        let names = dedup_column_names(columns.iter().map(|c| c.name.as_str()));
        let semantic: Vec<SemanticType> = columns
            .iter()
            .enumerate()
            .map(|(index, column)| self.column_type(rows, index, column))
            .collect();

        let records = rows
            .iter()
            .map(|row| {
                let mut record = NormalizedRecord::with_capacity(names.len());
                for (index, name) in names.iter().enumerate() {
                    let value = self.spec.convert(semantic[index], row.value_at(index));
                    record.push(name.clone(), value);
                }
                record
            })
            .collect();

        let columns = names
            .into_iter()
            .zip(columns)
            .zip(semantic)
            .map(|((name, column), semantic_type)| ColumnMeta {
                name,
                semantic_type,
                type_tag: column.type_tag.clone(),
            })
            .collect();

        NormalizedResult { columns, records }
    }

    fn column_type<R: RowAdapter>(&self, rows: &[R], index: usize, column: &ColumnDescriptor) -> SemanticType {
        if let Some(tag) = &column.type_tag {
            return self.spec.semantic_type(tag);
        }
        rows.iter()
            .map(|row| row.value_at(index))
            .find(|value| !value.is_null())
            .and_then(|value| infer_semantic_type(&value))
            .unwrap_or(SemanticType::Raw)
    }
}

/// Normalize with the given engine spec
pub fn normalize(rows: &RawRows, columns: &[ColumnDescriptor], spec: &EngineSpec) -> NormalizedResult {
    ResultNormalizer::new(spec).normalize(rows, columns)
}
