//! Data type registry.
//!
//! Every SQL literal and bound parameter passes through [`DataType`]: it is
//! the single seam between the generic [`Value`] representation and the
//! backend's column values. There is exactly one variant per supported
//! value kind.
//!
//! Reads are relaxed: a floating column read through an integer type is
//! truncated, numeric text is parsed, booleans are stored as `0`/`1`.
//! Sections and lists are stored as JSON text that tags every value with
//! its kind, so nested values read back exactly as written.

mod encoding;

use crate::models::{Section, Value};
use crate::{Error, Result};
use rusqlite::types::{Value as SqlValue, ValueRef};
use std::fmt;

/// Supported column value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// UTF-8 text.
    String,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Boolean flag.
    Boolean,
    /// Raw bytes.
    Bytes,
    /// Nested section or list, stored as kind-tagged JSON text.
    Section,
}

impl DataType {
    /// Returns all data types.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::String,
            Self::Integer,
            Self::Long,
            Self::Float,
            Self::Double,
            Self::Boolean,
            Self::Bytes,
            Self::Section,
        ]
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Bytes => "bytes",
            Self::Section => "section",
        }
    }

    /// Resolves the data type of a runtime value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedType`] for [`Value::Null`], which carries
    /// no kind.
    pub fn of(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Err(Error::UnsupportedType(
                "null value has no data type".to_string(),
            )),
            Value::String(_) => Ok(Self::String),
            Value::Integer(_) => Ok(Self::Integer),
            Value::Long(_) => Ok(Self::Long),
            Value::Float(_) => Ok(Self::Float),
            Value::Double(_) => Ok(Self::Double),
            Value::Boolean(_) => Ok(Self::Boolean),
            Value::Bytes(_) => Ok(Self::Bytes),
            Value::List(_) | Value::Section(_) => Ok(Self::Section),
        }
    }

    /// Resolves a data type from a declared type name.
    ///
    /// Matching is case-insensitive and accepts common aliases.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedType`] for unknown names.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "string" | "str" | "text" => Ok(Self::String),
            "integer" | "int" | "i32" => Ok(Self::Integer),
            "long" | "i64" => Ok(Self::Long),
            "float" | "f32" => Ok(Self::Float),
            "double" | "f64" => Ok(Self::Double),
            "boolean" | "bool" => Ok(Self::Boolean),
            "bytes" | "blob" => Ok(Self::Bytes),
            "section" | "config" | "list" => Ok(Self::Section),
            other => Err(Error::UnsupportedType(other.to_string())),
        }
    }

    /// Default generic value of this type.
    #[must_use]
    pub const fn default_value(&self) -> Value {
        match self {
            Self::String => Value::String(String::new()),
            Self::Integer => Value::Integer(0),
            Self::Long => Value::Long(0),
            Self::Float => Value::Float(0.0),
            Self::Double => Value::Double(0.0),
            Self::Boolean => Value::Boolean(false),
            Self::Bytes => Value::Bytes(Vec::new()),
            Self::Section => Value::Section(Section::new()),
        }
    }

    /// Converts a generic value into its backend bind representation.
    ///
    /// [`Value::Null`] binds as SQL `NULL` for every type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the value cannot be represented
    /// as this type, or if a section holds a non-finite float.
    pub fn to_backend(&self, value: &Value) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let converted = match self {
            Self::String => value.as_string().map(SqlValue::Text),
            Self::Integer => value.as_int().map(|v| SqlValue::Integer(i64::from(v))),
            Self::Long => value.as_long().map(SqlValue::Integer),
            Self::Float => value.as_float().map(|v| SqlValue::Real(f64::from(v))),
            Self::Double => value.as_double().map(SqlValue::Real),
            Self::Boolean => value.as_bool().map(|v| SqlValue::Integer(i64::from(v))),
            Self::Bytes => value.as_bytes().map(|b| SqlValue::Blob(b.to_vec())),
            Self::Section => match value {
                Value::Section(_) | Value::List(_) => Some(SqlValue::Text(encoding::encode(value)?)),
                _ => None,
            },
        };
        converted.ok_or_else(|| self.conversion_error(value.kind()))
    }

    /// Reads a backend column value back into a generic value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the column holds something that
    /// cannot be read as this type (for example a blob read as a number).
    pub fn from_backend(&self, raw: ValueRef<'_>) -> Result<Value> {
        let raw = raw_value(raw);
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let converted = match self {
            Self::String => match &raw {
                Value::Bytes(bytes) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
                other => other.as_string().map(Value::String),
            },
            Self::Integer => raw.as_int().map(Value::Integer),
            Self::Long => raw.as_long().map(Value::Long),
            Self::Float => raw.as_float().map(Value::Float),
            Self::Double => raw.as_double().map(Value::Double),
            Self::Boolean => raw.as_bool().map(Value::Boolean),
            Self::Bytes => raw.as_bytes().map(|b| Value::Bytes(b.to_vec())),
            Self::Section => match &raw {
                Value::String(text) => Some(encoding::decode(text.as_bytes())?),
                Value::Bytes(bytes) => Some(encoding::decode(bytes)?),
                _ => None,
            },
        };
        converted.ok_or_else(|| self.conversion_error(raw.kind()))
    }

    fn conversion_error(self, kind: &str) -> Error {
        Error::InvalidInput(format!("cannot convert {kind} to {self}"))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Maps a backend column value to the closest generic value.
fn raw_value(raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Long(v),
        ValueRef::Real(v) => Value::Double(v),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::Bytes(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}
