//! Provider-shaped tables returned by endpoint adapters.

use serde::Serialize;
use serde_json::{Map, Value};

use super::DataKind;

/// One raw row: provider column name → JSON scalar.
pub type RawRow = Map<String, Value>;

/// Rows exactly as an adapter received them. No normalization guarantees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawTable {
    /// Adapter that produced the table
    pub provider: String,
    pub kind: DataKind,
    /// Identifier the rows belong to
    pub identifier: String,
    /// Column names in provider order
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    /// An empty table with a known column set.
    pub fn new(
        provider: impl Into<String>,
        kind: DataKind,
        identifier: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            identifier: identifier.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Build from rows, taking the column set from the rows in first-seen order.
    pub fn from_rows(
        provider: impl Into<String>,
        kind: DataKind,
        identifier: impl Into<String>,
        rows: Vec<RawRow>,
    ) -> Self {
        let mut table = Self::new(provider, kind, identifier, Vec::new());
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Append a row, registering any column not seen before.
    pub fn push_row(&mut self, row: RawRow) {
        for key in row.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.rows.push(row);
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_rows_collects_columns_in_order() {
        let table = RawTable::from_rows(
            "mock",
            DataKind::IndexBar,
            "000001",
            vec![
                row(json!({"date": "2024-01-02", "close": 1.0})),
                row(json!({"date": "2024-01-03", "close": 2.0, "amount": 3.0})),
            ],
        );

        assert_eq!(table.len(), 2);
        assert!(table.has_column("amount"));
        assert_eq!(table.columns.len(), 3);
        assert!(!table.has_column("volume"));
    }
}
