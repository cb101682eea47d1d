//! Result value and row types for statement execution.

use serde::{Deserialize, Serialize};

/// A database value: null, integer, real, text, or blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Convert to i64 if possible.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert to f64 if possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Real(r) => Some(*r),
            SqlValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Borrow as a string slice if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Check if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render the value for flat string result sequences. Null renders as
    /// the empty string, matching what browsing surfaces expect.
    pub fn to_display_string(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(r) => r.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Blob(b) => format!("<{} bytes>", b.len()),
        }
    }
}

/// One result row: an ordered sequence of (column name, value) pairs.
///
/// Column order is the statement's projection order, which is what allows
/// callers to consume flat value sequences of N values per logical row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SqlRow {
    columns: Vec<(String, SqlValue)>,
}

impl SqlRow {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column to the row.
    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.push((name.into(), value));
    }

    /// Look a value up by column name.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Value at a projection position.
    pub fn value_at(&self, index: usize) -> Option<&SqlValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    /// Iterate values in projection order.
    pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
        self.columns.iter().map(|(_, value)| value)
    }

    /// Consume the row into its values, in projection order.
    pub fn into_values(self) -> Vec<SqlValue> {
        self.columns.into_iter().map(|(_, value)| value).collect()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for SqlRow {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_conversions() {
        let int_val = SqlValue::Integer(42);
        assert_eq!(int_val.as_i64(), Some(42));
        assert_eq!(int_val.as_f64(), Some(42.0));
        assert!(int_val.as_str().is_none());

        let text_val = SqlValue::Text("hello".to_string());
        assert_eq!(text_val.as_str(), Some("hello"));
        assert!(text_val.as_i64().is_none());

        assert!(SqlValue::Null.is_null());
        assert_eq!(SqlValue::Null.to_display_string(), "");
    }

    #[test]
    fn row_preserves_projection_order() {
        let mut row = SqlRow::new();
        row.push("id", SqlValue::Integer(7));
        row.push("name", SqlValue::Text("Jazz".to_string()));

        assert_eq!(row.len(), 2);
        assert_eq!(row.get("name").and_then(SqlValue::as_str), Some("Jazz"));
        assert_eq!(row.value_at(0), Some(&SqlValue::Integer(7)));

        let values = row.into_values();
        assert_eq!(values[0], SqlValue::Integer(7));
        assert_eq!(values[1], SqlValue::Text("Jazz".to_string()));
    }

    #[test]
    fn get_returns_first_match_for_duplicate_columns() {
        let row: SqlRow = vec![
            ("n".to_string(), SqlValue::Integer(1)),
            ("n".to_string(), SqlValue::Integer(2)),
        ]
        .into_iter()
        .collect();
        assert_eq!(row.get("n"), Some(&SqlValue::Integer(1)));
    }
}
