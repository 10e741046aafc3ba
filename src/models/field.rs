//! Column metadata.

use crate::types::DataType;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Referenced column of a foreign field.
///
/// Informational only: no constraint or cascade is emitted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignReference {
    /// Column name in the referenced table.
    pub foreign_name: String,
    /// Name of the referenced table.
    pub foreign_table_name: String,
}

/// A column of a [`Table`](crate::storage::Table).
///
/// Fields compare and hash by name only: two fields with the same name in
/// the same table are the same column.
#[derive(Debug, Clone)]
pub struct RecordField {
    name: String,
    data_type: DataType,
    max_size: u64,
    primary: bool,
    foreign: Option<ForeignReference>,
}

impl RecordField {
    /// Creates a plain value column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            max_size: 0,
            primary: false,
            foreign: None,
        }
    }

    /// Creates a column that is part of the primary key.
    #[must_use]
    pub fn primary(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            primary: true,
            ..Self::new(name, data_type)
        }
    }

    /// Creates a column referencing `foreign_table_name.foreign_name`.
    #[must_use]
    pub fn foreign(
        name: impl Into<String>,
        data_type: DataType,
        foreign_name: impl Into<String>,
        foreign_table_name: impl Into<String>,
    ) -> Self {
        Self {
            foreign: Some(ForeignReference {
                foreign_name: foreign_name.into(),
                foreign_table_name: foreign_table_name.into(),
            }),
            ..Self::new(name, data_type)
        }
    }

    /// Sets the maximum size hint (0 means unbounded).
    #[must_use]
    pub const fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub const fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column data type.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Maximum size hint.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Whether the column is part of the primary key.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.primary
    }

    /// Foreign reference, if any.
    #[must_use]
    pub const fn foreign_reference(&self) -> Option<&ForeignReference> {
        self.foreign.as_ref()
    }

    /// Full structural comparison, unlike `==` which compares names only.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && self.max_size == other.max_size
            && self.primary == other.primary
            && self.foreign == other.foreign
    }
}

impl PartialEq for RecordField {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for RecordField {}

impl Hash for RecordField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)
    }
}
