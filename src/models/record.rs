//! The record contract.

use super::{Section, Value};
use crate::Result;

/// Ordered primary-key column name to value mapping.
///
/// Uniquely identifies one record in its table and is what a record shell
/// is built from before the remaining columns are applied.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimaryFieldMap(Section);

impl PrimaryFieldMap {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self(Section::new())
    }

    /// Adds a key column, returning the map for chaining.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces a key column.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.set(name, value);
    }

    /// Returns the value of a key column.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Iterates key columns in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter()
    }

    /// Number of key columns.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no key column is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the map as a plain section.
    #[must_use]
    pub const fn as_section(&self) -> &Section {
        &self.0
    }
}

/// A typed storage entity.
///
/// Implemented by consumers for their own entity types. The identity
/// columns of a record (its primary-key fields) must not change after the
/// record is created: updates and deletes locate rows through them.
///
/// ```rust
/// use recordstore::{PrimaryFieldMap, Record, Result, Section, Value};
///
/// struct Setting {
///     identifier: String,
///     value: String,
/// }
///
/// impl Record for Setting {
///     fn from_primary(keys: &PrimaryFieldMap) -> Result<Self> {
///         let identifier = keys
///             .get("identifier")
///             .and_then(Value::as_string)
///             .unwrap_or_default();
///         Ok(Self { identifier, value: String::new() })
///     }
///
///     fn identifier(&self) -> Value {
///         Value::from(self.identifier.as_str())
///     }
///
///     fn field_values(&self) -> Section {
///         Section::new()
///             .with("identifier", self.identifier.as_str())
///             .with("value", self.value.as_str())
///     }
///
///     fn to_section(&self) -> Section {
///         Section::new().with("value", self.value.as_str())
///     }
///
///     fn apply_section(&mut self, section: &Section) -> Result<()> {
///         self.value = section.get_string("value").unwrap_or_default();
///         Ok(())
///     }
/// }
/// ```
pub trait Record: Sized + Send + 'static {
    /// Builds an empty record shell carrying only its identity.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key column is missing or malformed.
    fn from_primary(keys: &PrimaryFieldMap) -> Result<Self>;

    /// The record's identifier. Never [`Value::Null`].
    fn identifier(&self) -> Value;

    /// Every column value of the record, keyed by column name.
    ///
    /// Must cover every field declared by the owning table, key columns
    /// included.
    fn field_values(&self) -> Section;

    /// Converts the record's non-identity state to a generic section.
    fn to_section(&self) -> Section;

    /// Populates the record's fields from a generic section.
    ///
    /// # Errors
    ///
    /// Returns an error if the section cannot be applied.
    fn apply_section(&mut self, section: &Section) -> Result<()>;

    /// Names of the record's fields.
    fn field_names(&self) -> Vec<String> {
        self.field_values().keys().map(str::to_string).collect()
    }

    /// Builds a record from its identity and a generic section.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Record::from_primary`] and
    /// [`Record::apply_section`].
    fn from_section(keys: &PrimaryFieldMap, section: &Section) -> Result<Self> {
        let mut record = Self::from_primary(keys)?;
        record.apply_section(section)?;
        Ok(record)
    }
}
