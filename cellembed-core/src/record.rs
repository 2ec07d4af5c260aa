use std::{collections::HashMap, fmt};

use serde::Deserialize;
use serde_json::Value;

/// A single value read out of a dataset record.
///
/// Dataset loaders hand back loosely typed values (text, raw bytes, numbers or nothing at all).
/// Everything downstream of the adapter only ever sees the canonical text produced by
/// [`FieldValue::to_text`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Byte strings arrive as arrays of 0..=255 integers in JSON descriptions
    Bytes(Vec<u8>),
    /// Lists and nested objects, kept as-is
    Other(Value),
}

impl FieldValue {
    /// Canonical text form of the value. Bytes are decoded as UTF-8 (invalid sequences are
    /// replaced), null becomes the empty string, anything else is rendered as compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            FieldValue::Other(value) => value.to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Bytes(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// Coerces an optional field to text. Absent fields become the empty string.
pub fn coerce_to_text(value: Option<&FieldValue>) -> String {
    value.map(FieldValue::to_text).unwrap_or_default()
}

/// One entry of a dataset description. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: HashMap<String, FieldValue>,
}

impl Record {
    pub fn get(&self, field_name: &str) -> Option<&FieldValue> {
        self.fields.get(field_name)
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Record {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_every_variant_to_text() {
        assert_eq!(FieldValue::Null.to_text(), "");
        assert_eq!(FieldValue::Bool(true).to_text(), "true");
        assert_eq!(FieldValue::Integer(42).to_text(), "42");
        assert_eq!(FieldValue::Float(0.5).to_text(), "0.5");
        assert_eq!(FieldValue::Float(1.0).to_text(), "1");
        assert_eq!(FieldValue::Bool(false).to_text(), "false");
        assert_eq!(FieldValue::from("B2").to_text(), "B2");
        assert_eq!(FieldValue::from(b"HPA012345".to_vec()).to_text(), "HPA012345");
    }

    #[test]
    fn absent_fields_coerce_to_empty() {
        let record: Record = [("plate", "P1")].into_iter().collect();
        assert_eq!(coerce_to_text(record.get("plate")), "P1");
        assert_eq!(coerce_to_text(record.get("well")), "");
    }

    #[test]
    fn deserializes_loosely_typed_json() {
        let record: Record = serde_json::from_str(
            r#"{"path": "a.png", "plate": 7, "ratio": 1.5, "gene": null, "raw": [104, 105]}"#,
        ).unwrap();

        assert_eq!(record.get("path"), Some(&FieldValue::Text("a.png".into())));
        assert_eq!(record.get("plate"), Some(&FieldValue::Integer(7)));
        assert_eq!(record.get("ratio"), Some(&FieldValue::Float(1.5)));
        assert!(record.get("gene").unwrap().is_null());
        assert_eq!(coerce_to_text(record.get("raw")), "hi");
    }

    #[test]
    fn keeps_lists_and_objects_as_json_text() {
        let record: Record = serde_json::from_str(
            r#"{"tags": ["x", "y"], "stain": {"name": "DAPI", "channel": 1}, "mixed": [1, "a"]}"#,
        ).unwrap();

        assert_eq!(coerce_to_text(record.get("tags")), r#"["x","y"]"#);
        assert_eq!(coerce_to_text(record.get("stain")), r#"{"channel":1,"name":"DAPI"}"#);
        assert_eq!(coerce_to_text(record.get("mixed")), r#"[1,"a"]"#);
        assert!(matches!(record.get("tags"), Some(FieldValue::Other(_))));
    }
}
