//! Tabular records and the table that collects them.

use std::collections::BTreeMap;

use crate::protocol::payload::RecordPayload;

/// One row: an ordered list of column names plus their values.
///
/// Invariant: every column in `columns` has an entry in `values` and every key
/// in `values` appears in `columns`, exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    columns: Vec<String>,
    values: BTreeMap<String, String>,
}

impl Record {
    /// Builds a record from a column order and a value mapping.
    ///
    /// Duplicate column names keep their first position.  Columns with no
    /// value are backfilled with `""`, and values whose key is not in the
    /// order are appended to it.
    pub fn new<C>(columns: C, mut values: BTreeMap<String, String>) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let mut order: Vec<String> = Vec::new();
        for column in columns {
            let column = column.into();
            if !order.contains(&column) {
                order.push(column);
            }
        }
        for column in &order {
            values.entry(column.clone()).or_default();
        }
        for key in values.keys() {
            if !order.contains(key) {
                order.push(key.clone());
            }
        }
        Self {
            columns: order,
            values,
        }
    }

    /// Builds a record from `column=value` pairs in the given order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut columns = Vec::new();
        let mut values = BTreeMap::new();
        for (k, v) in pairs {
            let k = k.into();
            columns.push(k.clone());
            values.insert(k, v.into());
        }
        Self::new(columns, values)
    }

    /// Reconstructs a record from an inbound `DATA:` payload.
    pub fn from_payload(payload: RecordPayload) -> Self {
        Self::new(payload.columns, payload.values)
    }

    /// Payload carrying this record's own column order.
    pub fn to_payload(&self) -> RecordPayload {
        RecordPayload {
            columns: self.columns.clone(),
            values: self.values.clone(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|c| (c.as_str(), self.get(c).unwrap_or_default()))
    }
}

/// Known column names plus every record appended so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTable {
    columns: Vec<String>,
    records: Vec<Record>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that starts with the given columns and no records.
    pub fn with_columns<C>(columns: C) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let mut table = Self::new();
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        table.merge_columns(&columns);
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds columns not already known, preserving their order.
    ///
    /// Returns the number of columns added.
    pub fn merge_columns(&mut self, columns: &[String]) -> usize {
        let before = self.columns.len();
        for column in columns {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
            }
        }
        self.columns.len() - before
    }

    /// Merges the record's columns into the table and appends it.
    ///
    /// Returns the index of the new row.
    pub fn append(&mut self, record: Record) -> usize {
        self.merge_columns(record.columns());
        self.records.push(record);
        self.records.len() - 1
    }

    /// Row `index` projected onto the table's columns; absent cells read `""`.
    pub fn row(&self, index: usize) -> Option<Vec<String>> {
        let record = self.records.get(index)?;
        Some(
            self.columns
                .iter()
                .map(|c| record.get(c).unwrap_or_default().to_string())
                .collect(),
        )
    }

    /// Every row projected onto the table's columns.
    pub fn rows(&self) -> Vec<Vec<String>> {
        (0..self.records.len())
            .filter_map(|i| self.row(i))
            .collect()
    }

    /// Transfer payload for row `index`, ordered by the table's columns.
    pub fn payload_for(&self, index: usize) -> Option<RecordPayload> {
        let cells = self.row(index)?;
        Some(RecordPayload::new(
            self.columns.iter().cloned(),
            self.columns.iter().cloned().zip(cells),
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
