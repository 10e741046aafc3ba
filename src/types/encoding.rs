//! Column encoding of section values.
//!
//! Section columns hold JSON text in which every value carries its kind,
//! so a stored `Long` reads back as a `Long` and stored bytes read back as
//! bytes rather than a list of numbers. Entries keep insertion order.

use crate::models::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
enum Encoded {
    Null,
    String(String),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
    List(Vec<Encoded>),
    Section(Vec<(String, Encoded)>),
}

/// Encodes a section or list value as column text.
pub(super) fn encode(value: &Value) -> Result<String> {
    let encoded = Encoded::try_from(value)?;
    serde_json::to_string(&encoded).map_err(|e| Error::InvalidInput(e.to_string()))
}

/// Decodes column text written by [`encode`].
pub(super) fn decode(raw: &[u8]) -> Result<Value> {
    serde_json::from_slice::<Encoded>(raw)
        .map(Value::from)
        .map_err(|e| Error::InvalidInput(format!("malformed section column: {e}")))
}

impl TryFrom<&Value> for Encoded {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        let encoded = match value {
            Value::Null => Self::Null,
            Value::String(s) => Self::String(s.clone()),
            Value::Integer(v) => Self::Integer(*v),
            Value::Long(v) => Self::Long(*v),
            Value::Float(v) if v.is_finite() => Self::Float(*v),
            Value::Double(v) if v.is_finite() => Self::Double(*v),
            Value::Float(_) | Value::Double(_) => {
                return Err(Error::InvalidInput(format!(
                    "non-finite {} cannot be stored in a section column",
                    value.kind()
                )));
            },
            Value::Boolean(v) => Self::Boolean(*v),
            Value::Bytes(bytes) => Self::Bytes(bytes.clone()),
            Value::List(items) => {
                Self::List(items.iter().map(Self::try_from).collect::<Result<_>>()?)
            },
            Value::Section(section) => Self::Section(
                section
                    .iter()
                    .map(|(key, v)| Ok((key.to_string(), Self::try_from(v)?)))
                    .collect::<Result<_>>()?,
            ),
        };
        Ok(encoded)
    }
}

impl From<Encoded> for Value {
    fn from(encoded: Encoded) -> Self {
        match encoded {
            Encoded::Null => Self::Null,
            Encoded::String(s) => Self::String(s),
            Encoded::Integer(v) => Self::Integer(v),
            Encoded::Long(v) => Self::Long(v),
            Encoded::Float(v) => Self::Float(v),
            Encoded::Double(v) => Self::Double(v),
            Encoded::Boolean(v) => Self::Boolean(v),
            Encoded::Bytes(bytes) => Self::Bytes(bytes),
            Encoded::List(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Encoded::Section(entries) => Self::Section(
                entries
                    .into_iter()
                    .map(|(key, v)| (key, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;

    #[test]
    fn test_kinds_survive_encoding() {
        let value = Value::from(
            Section::new()
                .with("long", 5_i64)
                .with("float", 1.1_f32)
                .with("double", 0.1)
                .with("bytes", vec![1_u8, 2])
                .with("list", Value::List(vec![Value::from(3_i64), Value::Null]))
                .with("inner", Section::new().with("int", 7)),
        );
        let decoded = decode(encode(&value).unwrap().as_bytes()).unwrap();
        assert_eq!(decoded, value);

        let section = decoded.as_section().unwrap();
        assert_eq!(section.get("long"), Some(&Value::Long(5)));
        assert_eq!(section.get("float"), Some(&Value::Float(1.1)));
        assert_eq!(section.get_bytes("bytes"), Some(vec![1, 2]));
    }

    #[test]
    fn test_entry_order_is_kept() {
        let value = Value::from(Section::new().with("b", 1).with("a", 2));
        let decoded = decode(encode(&value).unwrap().as_bytes()).unwrap();
        let keys: Vec<&str> = decoded.as_section().unwrap().keys().collect();
        assert_eq!(keys, ["b", "a"]);
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        let value = Value::from(Section::new().with("nan", f64::NAN));
        assert!(matches!(encode(&value), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_untagged_json_is_malformed() {
        let result = decode(br#"{"long": 5}"#);
        assert!(matches!(result, Err(Error::InvalidInput(msg)) if msg.contains("malformed")));
    }
}
