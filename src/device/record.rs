//! Canonical per-device measurement record
//!
//! The key set is fixed by the protocol's base schema when the record is
//! created. Updates may only overwrite existing keys, and never with a null.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum RtValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl RtValue {
    pub fn is_none(&self) -> bool {
        matches!(self, RtValue::None)
    }
}

impl From<&serde_json::Value> for RtValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => RtValue::None,
            Value::Bool(b) => RtValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => RtValue::Int(i),
                None => n.as_f64().map(RtValue::Float).unwrap_or(RtValue::None),
            },
            Value::String(s) => RtValue::String(s.clone()),
            // Nested structures are kept verbatim as their JSON text
            other => RtValue::String(other.to_string()),
        }
    }
}

impl From<f64> for RtValue {
    fn from(value: f64) -> Self {
        RtValue::Float(value)
    }
}

impl From<i64> for RtValue {
    fn from(value: i64) -> Self {
        RtValue::Int(value)
    }
}

impl From<bool> for RtValue {
    fn from(value: bool) -> Self {
        RtValue::Bool(value)
    }
}

impl From<&str> for RtValue {
    fn from(value: &str) -> Self {
        RtValue::String(value.to_string())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DataRecord {
    fields: BTreeMap<String, RtValue>,
}

impl DataRecord {
    /// Create a record whose keys are exactly `schema`, all unset
    pub fn with_schema<I, S>(schema: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: schema
                .into_iter()
                .map(|k| (k.into(), RtValue::None))
                .collect(),
        }
    }

    /// Apply an update, returning how many stored values were overwritten
    ///
    /// Keys outside the schema and null values are skipped.
    pub fn merge<I, K>(&mut self, update: I) -> usize
    where
        I: IntoIterator<Item = (K, RtValue)>,
        K: AsRef<str>,
    {
        let mut overwritten = 0;
        for (key, value) in update {
            if value.is_none() {
                continue;
            }
            if let Some(slot) = self.fields.get_mut(key.as_ref()) {
                *slot = value;
                overwritten += 1;
            }
        }
        overwritten
    }

    pub fn read(&self, key: &str) -> Option<&RtValue> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, RtValue> {
        &self.fields
    }

    /// Fields that currently hold a value
    pub fn set_fields(&self) -> impl Iterator<Item = (&String, &RtValue)> {
        self.fields.iter().filter(|(_, v)| !v.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DataRecord {
        DataRecord::with_schema(["power", "batteryVoltage", "operMode"])
    }

    #[test]
    fn test_merge_overwrites_known_keys() {
        let mut rec = record();
        let n = rec.merge([("power", RtValue::Float(5.0))]);
        assert_eq!(n, 1);
        assert_eq!(rec.read("power"), Some(&RtValue::Float(5.0)));
    }

    #[test]
    fn test_merge_never_adds_keys() {
        let mut rec = record();
        let n = rec.merge([("frequency", RtValue::Float(60.0))]);
        assert_eq!(n, 0);
        assert_eq!(rec.read("frequency"), None);
        assert_eq!(rec.len(), 3);
    }

    #[test]
    fn test_merge_null_keeps_previous_value() {
        let mut rec = record();
        rec.merge([("power", RtValue::Int(3))]);
        rec.merge([
            ("power", RtValue::None),
            ("batteryVoltage", RtValue::Int(48)),
        ]);
        assert_eq!(rec.read("power"), Some(&RtValue::Int(3)));
        assert_eq!(rec.read("batteryVoltage"), Some(&RtValue::Int(48)));
    }

    #[test]
    fn test_set_fields_skips_unset() {
        let mut rec = record();
        rec.merge([("operMode", RtValue::from("grid"))]);
        let set: Vec<_> = rec.set_fields().map(|(k, _)| k.as_str()).collect();
        assert_eq!(set, vec!["operMode"]);
    }

    #[test]
    fn test_rt_value_from_json() {
        use serde_json::json;
        assert_eq!(RtValue::from(&json!(null)), RtValue::None);
        assert_eq!(RtValue::from(&json!(48)), RtValue::Int(48));
        assert_eq!(RtValue::from(&json!(4.5)), RtValue::Float(4.5));
        assert_eq!(RtValue::from(&json!("on")), RtValue::from("on"));
        assert_eq!(RtValue::from(&json!([1, 2])), RtValue::from("[1,2]"));
    }

    #[test]
    fn test_serializes_as_plain_json() {
        let mut rec = record();
        rec.merge([("power", RtValue::Int(5))]);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"power": 5, "batteryVoltage": null, "operMode": null})
        );
    }
}
