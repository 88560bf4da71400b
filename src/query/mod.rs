//! Structured queries and the pieces they are rendered from

pub mod catalog;
pub mod object;
pub mod sql;
pub mod time_range;

pub use catalog::{
    ColumnDef, ConnectionConfig, Database, Datasource, DatasourceCatalog, MetricDef, PasswordStore,
    StaticCatalog,
};
pub use object::{
    DatasourceKind, DatasourceRef, Filter, FilterOp, Metric, QueryObject, RenderContext, RenderError,
    RenderedQuery, TIMESTAMP_LABEL,
};
pub use sql::{check_statement, is_read_only, strip_comments, SqlError};
pub use time_range::{resolve_time_range, TimeBounds, TimeRangeError};
