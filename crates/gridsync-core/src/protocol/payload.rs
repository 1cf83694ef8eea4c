//! JSON body of a `DATA:` message.
//!
//! Wire shape:
//!
//! ```json
//! {"Columns":["Name","Age"],"Record":{"Name":"Ann","Age":"30"}}
//! ```
//!
//! `Columns` carries the sender's column order positionally; `Record` is the
//! column-to-value mapping.  On decode, `Record` may also wrap its values in a
//! `"Properties"` object, and non-string values are converted to text
//! (`null` becomes the empty string).

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::protocol::codec::ProtocolError;

/// Column order plus column-to-value mapping carried by `DATA:`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPayload {
    /// Column names in display order.
    pub columns: Vec<String>,
    /// Cell values keyed by column name.
    pub values: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct WirePayloadOut<'a> {
    #[serde(rename = "Columns")]
    columns: &'a [String],
    #[serde(rename = "Record")]
    record: OrderedValues<'a>,
}

#[derive(Deserialize)]
struct WirePayloadIn {
    #[serde(rename = "Columns", default)]
    columns: Option<Vec<String>>,
    #[serde(rename = "Record", default)]
    record: Option<Map<String, Value>>,
}

/// Serializes the value mapping in column order, then any remaining keys.
struct OrderedValues<'a>(&'a RecordPayload);

impl Serialize for OrderedValues<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let payload = self.0;
        let mut map = serializer.serialize_map(Some(payload.values.len()))?;
        for column in &payload.columns {
            if let Some(value) = payload.values.get(column) {
                map.serialize_entry(column, value)?;
            }
        }
        for (key, value) in &payload.values {
            if !payload.columns.iter().any(|c| c == key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

impl RecordPayload {
    /// Builds a payload from an explicit column order and value pairs.
    pub fn new<C, V, K, S>(columns: C, values: V) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        V: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Encodes the payload as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let wire = WirePayloadOut {
            columns: &self.columns,
            record: OrderedValues(self),
        };
        serde_json::to_string(&wire).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decodes a payload from the JSON text following `DATA:`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidPayload`] when the text is not a JSON object
    ///   of the expected shape.
    /// - [`ProtocolError::MissingField`] when `Columns` or `Record` is absent
    ///   or `null`.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let wire: WirePayloadIn =
            serde_json::from_str(json).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;

        let columns = wire.columns.ok_or(ProtocolError::MissingField("Columns"))?;
        let record = wire.record.ok_or(ProtocolError::MissingField("Record"))?;

        let fields = match record.get("Properties") {
            Some(Value::Object(inner)) => {
                debug!("DATA record uses a Properties wrapper");
                inner
            }
            _ => &record,
        };

        let values = fields
            .iter()
            .map(|(key, value)| (key.clone(), value_to_text(value)))
            .collect();

        Ok(Self { columns, values })
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_json_uses_wire_field_names() {
        let payload = RecordPayload::new(["X"], [("X", "1")]);
        let json = payload.to_json().unwrap();
        assert_eq!(json, r#"{"Columns":["X"],"Record":{"X":"1"}}"#);
    }

    #[test]
    fn test_to_json_writes_values_in_column_order() {
        // BTreeMap would sort "Name" after "Age"; the wire keeps column order.
        let payload = RecordPayload::new(["Name", "Age"], [("Name", "Ann"), ("Age", "30")]);
        let json = payload.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"Columns":["Name","Age"],"Record":{"Name":"Ann","Age":"30"}}"#
        );
    }

    #[test]
    fn test_from_json_flat_record() {
        let payload =
            RecordPayload::from_json(r#"{"Columns":["Name","Age"],"Record":{"Name":"Ann","Age":"30"}}"#)
                .unwrap();
        assert_eq!(payload.columns, vec!["Name", "Age"]);
        assert_eq!(payload.values.get("Name").map(String::as_str), Some("Ann"));
        assert_eq!(payload.values.get("Age").map(String::as_str), Some("30"));
    }

    #[test]
    fn test_from_json_properties_wrapper() {
        let payload = RecordPayload::from_json(
            r#"{"Columns":["A"],"Record":{"Properties":{"A":"wrapped"}}}"#,
        )
        .unwrap();
        assert_eq!(payload.values.get("A").map(String::as_str), Some("wrapped"));
        assert!(!payload.values.contains_key("Properties"));
    }

    #[test]
    fn test_from_json_converts_non_string_values() {
        let payload = RecordPayload::from_json(
            r#"{"Columns":["n","b","z"],"Record":{"n":42,"b":true,"z":null}}"#,
        )
        .unwrap();
        assert_eq!(payload.values["n"], "42");
        assert_eq!(payload.values["b"], "true");
        assert_eq!(payload.values["z"], "");
    }

    #[test]
    fn test_from_json_missing_columns_is_error() {
        let result = RecordPayload::from_json(r#"{"Record":{"A":"1"}}"#);
        assert_eq!(result, Err(ProtocolError::MissingField("Columns")));
    }

    #[test]
    fn test_from_json_null_record_is_error() {
        let result = RecordPayload::from_json(r#"{"Columns":["A"],"Record":null}"#);
        assert_eq!(result, Err(ProtocolError::MissingField("Record")));
    }

    #[test]
    fn test_from_json_garbage_is_invalid_payload() {
        let result = RecordPayload::from_json("{not json");
        assert!(matches!(result, Err(ProtocolError::InvalidPayload(_))));
    }

    #[test]
    fn test_from_json_columns_of_wrong_type_is_invalid_payload() {
        let result = RecordPayload::from_json(r#"{"Columns":"A","Record":{}}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidPayload(_))));
    }
}
