//! Table schema definitions.

use crate::models::{PrimaryFieldMap, Record, RecordField, Section};
use crate::{Error, Result};
use std::fmt;
use std::marker::PhantomData;

/// Schema of the table storing records of type `R`.
///
/// Holds the table name and its ordered fields, at least one of which is
/// part of the primary key. Immutable once built.
pub struct Table<R> {
    name: String,
    fields: Vec<RecordField>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> Table<R> {
    /// Creates a table definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the table or a field name is not
    /// a plain identifier, a field name repeats, or no field is primary.
    pub fn new(name: impl Into<String>, fields: Vec<RecordField>) -> Result<Self> {
        let name = name.into();
        let mismatch = |detail: String| Error::SchemaMismatch {
            table: name.clone(),
            detail,
        };

        if !is_identifier(&name) {
            return Err(mismatch(format!("invalid table name '{name}'")));
        }
        for (idx, field) in fields.iter().enumerate() {
            if !is_identifier(field.name()) {
                return Err(mismatch(format!("invalid field name '{}'", field.name())));
            }
            if fields[..idx].contains(field) {
                return Err(mismatch(format!("duplicate field '{}'", field.name())));
            }
        }
        if !fields.iter().any(RecordField::is_primary) {
            return Err(mismatch("table has no primary field".to_string()));
        }

        Ok(Self {
            name,
            fields,
            _record: PhantomData,
        })
    }

    /// Returns the same definition under `prefix` + name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the prefixed name is not a plain
    /// identifier.
    pub fn prefixed(self, prefix: &str) -> Result<Self> {
        let name = format!("{prefix}{}", self.name);
        if !is_identifier(&name) {
            return Err(Error::SchemaMismatch {
                table: self.name,
                detail: format!("invalid table name '{name}' after applying prefix '{prefix}'"),
            });
        }
        Ok(Self { name, ..self })
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[RecordField] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Primary-key fields in declaration order.
    pub fn primary_fields(&self) -> impl Iterator<Item = &RecordField> {
        self.fields.iter().filter(|f| f.is_primary())
    }

    /// Non-key fields in declaration order.
    pub fn value_fields(&self) -> impl Iterator<Item = &RecordField> {
        self.fields.iter().filter(|f| !f.is_primary())
    }

    /// Whether both definitions declare the same columns.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        self.name == other.name
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.same_definition(b))
    }

    /// Returns the record's values for every declared field, in field order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the record omits a declared
    /// field or provides one the table does not declare.
    pub fn record_values(&self, record: &R) -> Result<Section> {
        let mut provided = record.field_values();
        let mut ordered = Section::new();
        for field in &self.fields {
            let value = provided.remove(field.name()).ok_or_else(|| Error::SchemaMismatch {
                table: self.name.clone(),
                detail: format!("record is missing field '{}'", field.name()),
            })?;
            ordered.set(field.name(), value);
        }
        if let Some(extra) = provided.keys().next() {
            return Err(Error::SchemaMismatch {
                table: self.name.clone(),
                detail: format!("record has undeclared field '{extra}'"),
            });
        }
        Ok(ordered)
    }

    /// Extracts the record's primary-key values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if a key field is missing or null.
    pub fn primary_map(&self, record: &R) -> Result<PrimaryFieldMap> {
        let values = record.field_values();
        let mut keys = PrimaryFieldMap::new();
        for field in self.primary_fields() {
            match values.get(field.name()) {
                Some(value) if !value.is_null() => keys.insert(field.name(), value.clone()),
                _ => {
                    return Err(Error::SchemaMismatch {
                        table: self.name.clone(),
                        detail: format!("record has no value for key field '{}'", field.name()),
                    });
                },
            }
        }
        Ok(keys)
    }

    /// Checks that `keys` names exactly the table's key fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] otherwise.
    pub fn check_primary(&self, keys: &PrimaryFieldMap) -> Result<()> {
        let expected = self.primary_fields().count();
        let covered = self
            .primary_fields()
            .filter(|f| keys.get(f.name()).is_some())
            .count();
        if covered == expected && keys.len() == expected {
            Ok(())
        } else {
            Err(Error::SchemaMismatch {
                table: self.name.clone(),
                detail: "primary key map does not match key fields".to_string(),
            })
        }
    }
}

impl<R> fmt::Debug for Table<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// Returns true for names made of ASCII letters, digits and underscores
/// that do not start with a digit.
/// Whether `name` can be used unquoted as a table or column name.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
