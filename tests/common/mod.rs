//! Record types shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use recordstore::{
    DataType, Database, DatabaseConfig, PrimaryFieldMap, Record, RecordField, Result, Section,
    Table, TableSelection, Value,
};

/// A key/value setting, the shape of the `example` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub identifier: String,
    pub value: String,
}

impl Setting {
    pub fn new(identifier: &str, value: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            value: value.to_string(),
        }
    }
}

impl Record for Setting {
    fn from_primary(keys: &PrimaryFieldMap) -> Result<Self> {
        let identifier = keys
            .get("identifier")
            .and_then(Value::as_string)
            .unwrap_or_default();
        Ok(Self::new(&identifier, ""))
    }

    fn identifier(&self) -> Value {
        Value::from(self.identifier.as_str())
    }

    fn field_values(&self) -> Section {
        Section::new()
            .with("identifier", self.identifier.as_str())
            .with("value", self.value.as_str())
    }

    fn to_section(&self) -> Section {
        Section::new().with("value", self.value.as_str())
    }

    fn apply_section(&mut self, section: &Section) -> Result<()> {
        self.value = section.get_string("value").unwrap_or_default();
        Ok(())
    }
}

pub fn setting_table() -> Table<Setting> {
    Table::new(
        "example",
        vec![
            RecordField::primary("identifier", DataType::String).with_max_size(128),
            RecordField::new("value", DataType::String),
        ],
    )
    .unwrap()
}

/// A record carrying one column of every data type, keyed by two columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub owner: String,
    pub slot: i32,
    pub total: i64,
    pub ratio: f32,
    pub precise: f64,
    pub flag: bool,
    pub blob: Vec<u8>,
    pub extra: Section,
}

impl Record for Sample {
    fn from_primary(keys: &PrimaryFieldMap) -> Result<Self> {
        Ok(Self {
            owner: keys.get("owner").and_then(Value::as_string).unwrap_or_default(),
            slot: keys.get("slot").and_then(Value::as_int).unwrap_or_default(),
            total: 0,
            ratio: 0.0,
            precise: 0.0,
            flag: false,
            blob: Vec::new(),
            extra: Section::new(),
        })
    }

    fn identifier(&self) -> Value {
        Value::from(format!("{}#{}", self.owner, self.slot))
    }

    fn field_values(&self) -> Section {
        Section::new()
            .with("owner", self.owner.as_str())
            .with("slot", self.slot)
            .with_section(self.to_section())
    }

    fn to_section(&self) -> Section {
        Section::new()
            .with("total", self.total)
            .with("ratio", self.ratio)
            .with("precise", self.precise)
            .with("flag", self.flag)
            .with("blob", self.blob.clone())
            .with("extra", self.extra.clone())
    }

    fn apply_section(&mut self, section: &Section) -> Result<()> {
        self.total = section.get_long("total").unwrap_or_default();
        self.ratio = section.get_float("ratio").unwrap_or_default();
        self.precise = section.get_double("precise").unwrap_or_default();
        self.flag = section.get_bool("flag").unwrap_or_default();
        self.blob = section.get_bytes("blob").unwrap_or_default();
        self.extra = section.get_section("extra").cloned().unwrap_or_default();
        Ok(())
    }
}

/// Merges `other` into a section; test-side helper.
trait WithSection {
    fn with_section(self, other: Section) -> Self;
}

impl WithSection for Section {
    fn with_section(mut self, other: Section) -> Self {
        for (key, value) in other {
            self.set(key, value);
        }
        self
    }
}

pub fn sample_table() -> Table<Sample> {
    Table::new(
        "samples",
        vec![
            RecordField::primary("owner", DataType::String),
            RecordField::primary("slot", DataType::Integer),
            RecordField::new("total", DataType::Long),
            RecordField::new("ratio", DataType::Float),
            RecordField::new("precise", DataType::Double),
            RecordField::new("flag", DataType::Boolean),
            RecordField::new("blob", DataType::Bytes),
            RecordField::new("extra", DataType::Section),
        ],
    )
    .unwrap()
}

pub async fn connected(config: DatabaseConfig) -> Database {
    let db = Database::new(config);
    db.connect().await.unwrap();
    db
}

pub async fn settings(db: &Database) -> TableSelection<Setting> {
    db.create_table(setting_table()).await.unwrap()
}
