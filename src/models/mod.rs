//! Data models: generic values, column metadata and the record contract.

mod field;
mod record;
mod value;

pub use field::{ForeignReference, RecordField};
pub use record::{PrimaryFieldMap, Record};
pub use value::{Section, Value};
