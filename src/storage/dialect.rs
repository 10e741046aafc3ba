//! SQL dialect boundary.
//!
//! Statement generation only ever fills the templates a [`Dialect`]
//! provides. Substitution points are `{table}`, `{field}`, `{type}`,
//! `{where}`, plus `{fields}`, `{values}`, `{assignments}`, `{columns}`
//! and `{keys}` for list-shaped statements.

use crate::types::DataType;
use std::fmt;

/// Statement shapes a dialect supplies templates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Create the table if it does not exist.
    CreateTable,
    /// Add a single column.
    AddColumn,
    /// Introspect column names.
    ColumnNames,
    /// Select at most one row.
    SelectFirst,
    /// Select all matching rows.
    SelectAll,
    /// Count matching rows.
    Count,
    /// Insert one row.
    Insert,
    /// Update matching rows.
    Update,
    /// Delete matching rows.
    Delete,
}

/// A SQL dialect.
pub trait Dialect: fmt::Debug + Send + Sync {
    /// Dialect name, used as the `backend` metrics label.
    fn name(&self) -> &'static str;

    /// Statement template for `kind`.
    fn template(&self, kind: StatementKind) -> &'static str;

    /// Column type name for a data type with an optional size hint.
    fn column_type(&self, data_type: DataType, max_size: u64) -> String;

    /// Placeholder for the bind parameter at `index` (1-based).
    fn placeholder(&self, index: usize) -> String;

    /// Quotes a table or column name.
    fn quote_identifier(&self, identifier: &str) -> String;

    /// Index of the column holding the column name in introspection rows.
    fn column_name_index(&self) -> usize;
}

/// `SQLite` dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn template(&self, kind: StatementKind) -> &'static str {
        match kind {
            StatementKind::CreateTable => {
                "CREATE TABLE IF NOT EXISTS {table} ({columns}, PRIMARY KEY ({keys}))"
            },
            StatementKind::AddColumn => "ALTER TABLE {table} ADD COLUMN {field} {type}",
            StatementKind::ColumnNames => "PRAGMA table_info({table})",
            StatementKind::SelectFirst => "SELECT {fields} FROM {table}{where} LIMIT 1",
            StatementKind::SelectAll => "SELECT {fields} FROM {table}{where}",
            StatementKind::Count => "SELECT COUNT(*) FROM {table}{where}",
            StatementKind::Insert => "INSERT INTO {table} ({fields}) VALUES ({values})",
            StatementKind::Update => "UPDATE {table} SET {assignments}{where}",
            StatementKind::Delete => "DELETE FROM {table}{where}",
        }
    }

    fn column_type(&self, data_type: DataType, max_size: u64) -> String {
        match data_type {
            DataType::String if max_size > 0 => format!("VARCHAR({max_size})"),
            DataType::String | DataType::Section => "TEXT".to_string(),
            DataType::Integer | DataType::Long | DataType::Boolean => "INTEGER".to_string(),
            DataType::Float | DataType::Double => "REAL".to_string(),
            DataType::Bytes => "BLOB".to_string(),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn column_name_index(&self) -> usize {
        1
    }
}

/// Fills `template` with the given substitutions.
#[must_use]
pub fn render(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut statement = template.to_string();
    for (key, value) in substitutions {
        statement = statement.replace(&format!("{{{key}}}"), value);
    }
    statement
}
