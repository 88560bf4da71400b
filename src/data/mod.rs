pub mod record;
pub mod value;

pub use record::{ColumnMeta, NormalizedRecord, NormalizedResult};
pub use value::{DataType, RawValue, SemanticType, Value};
