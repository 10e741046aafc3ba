//! Conjunctive equality queries.
//!
//! A [`Query`] holds an ordered list of `(field, value)` constraints joined
//! with `AND`. Compiling and binding iterate that same list, so placeholder
//! `n` always receives the `n`-th constraint's value.
//!
//! A query with no constraints matches every row, exactly like an absent
//! query.

use super::dialect::Dialect;
use super::table::Table;
use crate::models::{PrimaryFieldMap, Record, Value};
use crate::types::DataType;
use crate::{Error, Result};
use rusqlite::Statement;
use rusqlite::types::Value as SqlValue;

/// Accumulating set of equality constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    constraints: Vec<(String, Value)>,
}

impl Query {
    /// Creates a query without constraints.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }

    /// Adds a constraint, or overwrites the value of an existing one while
    /// keeping its position.
    #[must_use]
    pub fn with_match(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_match(field, value);
        self
    }

    /// In-place form of [`Query::with_match`].
    pub fn set_match(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.constraints.iter_mut().find(|(name, _)| *name == field) {
            Some(constraint) => constraint.1 = value,
            None => self.constraints.push((field, value)),
        }
    }

    /// Seeds constraints from the primary-key fields of `record`.
    ///
    /// Only key columns are used, so the resulting query identifies exactly
    /// the stored row of this record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if the record does not provide a
    /// value for every key column of `table`.
    pub fn with_record<R: Record>(self, table: &Table<R>, record: &R) -> Result<Self> {
        Ok(self.with_primary(&table.primary_map(record)?))
    }

    /// Seeds constraints from a primary-key map.
    #[must_use]
    pub fn with_primary(mut self, keys: &PrimaryFieldMap) -> Self {
        for (name, value) in keys.iter() {
            self.set_match(name, value.clone());
        }
        self
    }

    /// Constraints in insertion order.
    #[must_use]
    pub fn constraints(&self) -> &[(String, Value)] {
        &self.constraints
    }

    /// Returns true when the query has no constraints.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Compiles the `WHERE` clause, numbering placeholders from
    /// `first_index`.
    ///
    /// The clause is empty when there are no constraints, otherwise it
    /// starts with ` WHERE `.
    #[must_use]
    pub fn compile_where(&self, dialect: &dyn Dialect, first_index: usize) -> CompiledWhere {
        let conditions: Vec<String> = self
            .constraints
            .iter()
            .enumerate()
            .map(|(offset, (field, _))| {
                format!(
                    "{} = {}",
                    dialect.quote_identifier(field),
                    dialect.placeholder(first_index + offset)
                )
            })
            .collect();
        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        CompiledWhere {
            clause,
            first_index,
            bindings: self.constraints.clone(),
        }
    }
}

impl From<&PrimaryFieldMap> for Query {
    fn from(keys: &PrimaryFieldMap) -> Self {
        Self::new().with_primary(keys)
    }
}

/// A compiled `WHERE` clause and its ordered bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledWhere {
    clause: String,
    first_index: usize,
    bindings: Vec<(String, Value)>,
}

impl CompiledWhere {
    /// The clause text (possibly empty).
    #[must_use]
    pub fn clause(&self) -> &str {
        &self.clause
    }

    /// Bind values in placeholder order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.bindings.iter().map(|(_, v)| v)
    }

    /// Number of placeholders in the clause.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true when the clause has no placeholders.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Index of the first placeholder after this clause.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.first_index + self.bindings.len()
    }

    /// Converts bind values to backend values.
    ///
    /// `column_type` supplies the declared type of a column; values of
    /// undeclared columns are converted by their own kind.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be converted.
    pub fn backend_values(
        &self,
        column_type: impl Fn(&str) -> Option<DataType>,
    ) -> Result<Vec<SqlValue>> {
        self.bindings
            .iter()
            .map(|(field, value)| {
                if value.is_null() {
                    return Ok(SqlValue::Null);
                }
                let data_type = match column_type(field) {
                    Some(data_type) => data_type,
                    None => DataType::of(value)?,
                };
                data_type.to_backend(value)
            })
            .collect()
    }

    /// Binds the clause's values onto `statement` at their placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Statement`] if binding fails.
    pub fn bind_placeholders(
        &self,
        statement: &mut Statement<'_>,
        operation: &'static str,
        sql: &str,
        column_type: impl Fn(&str) -> Option<DataType>,
    ) -> Result<()> {
        for (offset, value) in self.backend_values(column_type)?.into_iter().enumerate() {
            statement
                .raw_bind_parameter(self.first_index + offset, value)
                .map_err(|e| Error::Statement {
                    operation: operation.to_string(),
                    statement: sql.to_string(),
                    cause: e.to_string(),
                })?;
        }
        Ok(())
    }
}
