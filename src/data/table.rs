//! In-memory tabular data model.
//!
//! A [`Table`] is a list of named [`Column`]s of equal length holding typed
//! cell [`Value`]s. It is deliberately small: just enough structure for the
//! sandbox to index, filter, group and aggregate.

use crate::error::DataError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

/// Cells that look like numbers, money or dates.
static NUMERIC_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\d,.$€¥-]").expect("valid numeric-like pattern"));

/// Everything that is not part of a plain decimal number.
static NON_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\d.-]").expect("valid strip pattern"));

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing value (rendered as `NaN`).
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Parse a raw text cell. Empty cells are missing.
    pub fn parse_cell(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Number(n),
            _ => Value::Text(raw.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness used by boolean masks.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
        }
    }

    /// Total order used for sorting and grouping. Missing values sort last,
    /// numbers before text.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Bool(_) => 0,
                Value::Number(_) => 1,
                Value::Text(_) => 2,
                Value::Null => 3,
            }
        }
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }

    /// Key form used when a value becomes a JSON object key.
    pub fn key_string(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NaN"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        if n.is_finite() {
            Value::Number(n)
        } else {
            Value::Null
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// Format a number the way a dataframe would print it.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let rounded = (n * 1e6).round() / 1e6;
        format!("{}", rounded)
    }
}

/// Wrapper giving [`Value`] a total order so it can key a `BTreeMap`.
#[derive(Debug, Clone)]
pub struct OrderedValue(pub Value);

impl PartialEq for OrderedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedValue {}

impl PartialOrd for OrderedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.sort_cmp(&other.0)
    }
}

/// A named column of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Build a column from raw text cells, inferring its type: if every
    /// non-empty cell parses as a number the column is numeric, otherwise all
    /// non-empty cells are kept as text.
    pub fn from_raw(name: impl Into<String>, raw: &[String]) -> Self {
        let parsed: Vec<Value> = raw.iter().map(|s| Value::parse_cell(s)).collect();
        let all_numeric = parsed
            .iter()
            .all(|v| matches!(v, Value::Null | Value::Number(_)));

        let values = if all_numeric {
            parsed
        } else {
            raw.iter()
                .map(|s| {
                    if s.trim().is_empty() {
                        Value::Null
                    } else {
                        Value::Text(s.clone())
                    }
                })
                .collect()
        };

        Self::new(name, values)
    }

    /// An "object" column holds at least one text cell.
    pub fn is_text(&self) -> bool {
        self.values.iter().any(|v| matches!(v, Value::Text(_)))
    }

    pub fn is_numeric(&self) -> bool {
        self.values
            .iter()
            .all(|v| matches!(v, Value::Null | Value::Number(_) | Value::Bool(_)))
    }

    /// Whether the column holds digit- or currency-like text.
    pub fn is_numeric_like(&self) -> bool {
        self.values
            .iter()
            .any(|v| v.as_str().is_some_and(|s| NUMERIC_LIKE.is_match(s)))
    }

    /// Strip everything but digits, `.` and `-` from text cells and parse them.
    /// Cells that still do not parse become missing.
    pub fn coerce_numeric(&mut self) {
        for cell in &mut self.values {
            if let Value::Text(s) = cell {
                let stripped = NON_NUMERIC.replace_all(s, "");
                *cell = match stripped.parse::<f64>() {
                    Ok(n) if n.is_finite() => Value::Number(n),
                    _ => Value::Null,
                };
            }
        }
    }
}

/// Normalize a single column name: lower-case, trim, spaces to underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.to_lowercase().trim().replace(' ', "_")
}

/// A two-dimensional table with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Build a table from a header row and raw text rows. Short rows are
    /// padded with missing cells; extra cells are dropped.
    pub fn from_raw_rows(headers: &[String], rows: &[Vec<String>]) -> Self {
        let columns = headers
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let raw: Vec<String> = rows
                    .iter()
                    .map(|row| row.get(i).cloned().unwrap_or_default())
                    .collect();
                Column::from_raw(name.clone(), &raw)
            })
            .collect();
        Self { columns }
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Fail with [`DataError::MissingColumns`] unless every name exists.
    pub fn require_columns(&self, names: &[String]) -> Result<(), DataError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| self.column(n).is_none())
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DataError::MissingColumns { columns: missing })
        }
    }

    /// Normalize every column name in place. Idempotent.
    pub fn normalize_column_names(&mut self) {
        for column in &mut self.columns {
            column.name = normalize_column_name(&column.name);
        }
    }

    /// Coerce numeric-like text columns to numbers. Returns the names of the
    /// coerced columns.
    pub fn coerce_numeric_like(&mut self) -> Vec<String> {
        let mut coerced = Vec::new();
        for column in &mut self.columns {
            if column.is_text() && column.is_numeric_like() {
                column.coerce_numeric();
                coerced.push(column.name.clone());
            }
        }
        coerced
    }

    /// Merge `partial` into this table: non-missing cells of columns present
    /// in both overwrite the cell at the same row. Other columns are ignored.
    pub fn update(&mut self, partial: &Table) -> usize {
        let mut changed = 0;
        for source in &partial.columns {
            let Some(target) = self.column_mut(&source.name) else {
                continue;
            };
            for (cell, update) in target.values.iter_mut().zip(&source.values) {
                if !update.is_null() {
                    *cell = update.clone();
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Keep only the rows at the given positions, in order.
    pub fn take_rows(&self, rows: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                Column::new(
                    c.name.clone(),
                    rows.iter()
                        .filter_map(|&r| c.values.get(r).cloned())
                        .collect(),
                )
            })
            .collect();
        Table { columns }
    }

    /// Project onto the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> Result<Table, DataError> {
        self.require_columns(names)?;
        let columns = names
            .iter()
            .filter_map(|n| self.column(n).cloned())
            .collect();
        Ok(Table { columns })
    }

    /// Values of one row, paired with column names.
    pub fn row(&self, index: usize) -> Option<Vec<(String, Value)>> {
        if index >= self.n_rows() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name.clone(), c.values[index].clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(values: &[&str]) -> Vec<Value> {
        values.iter().map(|s| Value::from(*s)).collect()
    }

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("  Sale Price "), "sale_price");
        assert_eq!(normalize_column_name("Country"), "country");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let mut table = Table::new(vec![
            Column::new(" Sale Price", vec![]),
            Column::new("Units Sold ", vec![]),
            Column::new("COGS", vec![]),
        ]);
        table.normalize_column_names();
        let once = table.column_names();
        table.normalize_column_names();
        assert_eq!(table.column_names(), once);
        assert_eq!(once, vec!["sale_price", "units_sold", "cogs"]);
    }

    #[test]
    fn test_column_type_inference() {
        let numeric = Column::from_raw("n", &["1".into(), "".into(), "2.5".into()]);
        assert_eq!(
            numeric.values,
            vec![Value::Number(1.0), Value::Null, Value::Number(2.5)]
        );

        let mixed = Column::from_raw("m", &["1".into(), "abc".into()]);
        assert!(mixed.is_text());
        assert_eq!(mixed.values[0], Value::Text("1".into()));
    }

    #[test]
    fn test_coerce_numeric_like_columns() {
        let mut table = Table::new(vec![
            Column::new("price", text(&[" $1,200.50 ", "€30", "n/a"])),
            Column::new("country", text(&["Canada", "France", "Germany"])),
        ]);

        let coerced = table.coerce_numeric_like();
        assert_eq!(coerced, vec!["price"]);

        let price = table.column("price").unwrap();
        assert_eq!(
            price.values,
            vec![Value::Number(1200.5), Value::Number(30.0), Value::Null]
        );
        assert!(table.column("country").unwrap().is_text());
    }

    #[test]
    fn test_update_merges_non_missing_cells() {
        let mut table = Table::new(vec![
            Column::new("a", vec![Value::Number(1.0), Value::Number(2.0)]),
            Column::new("b", text(&["x", "y"])),
        ]);
        let partial = Table::new(vec![
            Column::new("a", vec![Value::Null, Value::Number(20.0)]),
            Column::new("zzz", vec![Value::Number(9.0)]),
        ]);

        let changed = table.update(&partial);
        assert_eq!(changed, 1);
        assert_eq!(
            table.column("a").unwrap().values,
            vec![Value::Number(1.0), Value::Number(20.0)]
        );
        assert!(table.column("zzz").is_none());
    }

    #[test]
    fn test_select_reports_missing_columns() {
        let table = Table::new(vec![Column::new("a", vec![])]);
        let err = table
            .select(&["a".to_string(), "nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, DataError::MissingColumns { columns } if columns == vec!["nope"]));
    }

    #[test]
    fn test_sort_cmp_puts_missing_last() {
        let mut values = vec![Value::Null, Value::Number(2.0), Value::Number(-1.0)];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![Value::Number(-1.0), Value::Number(2.0), Value::Null]
        );
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "NaN");
    }
}
