//! The row-result envelope: `{__C_: columns, __R_: rows, __A_: additional}`
//! rehydrated into an iterable result set.

use crate::protocol::{ENVELOPE_ADDITIONAL, ENVELOPE_COLUMNS, ENVELOPE_ROWS};
use serde_json::{Map, Value as JsonValue};

/// A rehydrated row result. Iteration yields rows in `__R_` order; column
/// order matches `__C_`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    pub additional: Option<JsonValue>,
}

impl RowSet {
    /// Recognize and rehydrate a row envelope. Returns `None` when the value
    /// is not an envelope (so ordinary results pass through untouched).
    pub fn from_envelope(value: &JsonValue) -> Option<RowSet> {
        let obj = value.as_object()?;
        let columns = obj.get(ENVELOPE_COLUMNS)?.as_array()?;
        let rows = obj.get(ENVELOPE_ROWS)?.as_array()?;

        let columns: Option<Vec<String>> = columns
            .iter()
            .map(|c| c.as_str().map(str::to_string))
            .collect();
        let rows: Option<Vec<Vec<JsonValue>>> = rows
            .iter()
            .map(|r| r.as_array().cloned())
            .collect();

        Some(RowSet {
            columns: columns?,
            rows: rows?,
            additional: obj.get(ENVELOPE_ADDITIONAL).cloned(),
        })
    }

    /// Serialize back into the wire envelope.
    pub fn to_envelope(&self) -> JsonValue {
        let mut obj = Map::new();
        obj.insert(
            ENVELOPE_COLUMNS.to_string(),
            JsonValue::Array(self.columns.iter().cloned().map(JsonValue::String).collect()),
        );
        obj.insert(
            ENVELOPE_ROWS.to_string(),
            JsonValue::Array(
                self.rows
                    .iter()
                    .map(|r| JsonValue::Array(r.clone()))
                    .collect(),
            ),
        );
        if let Some(additional) = &self.additional {
            obj.insert(ENVELOPE_ADDITIONAL.to_string(), additional.clone());
        }
        JsonValue::Object(obj)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }
}

/// Borrowed view of one row with by-name access.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [JsonValue],
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a JsonValue> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.values.get(idx)
    }

    pub fn values(&self) -> &'a [JsonValue] {
        self.values
    }
}
