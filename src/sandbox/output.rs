//! Values produced by sandboxed snippets and their text rendering.
//!
//! Rendering mirrors what a dataframe library would print: aligned series,
//! tables with a header row, and text bar charts for plots.

use crate::data::table::{Column, Table, Value};
use serde::Serialize;
use std::fmt;

/// Rows shown before a rendered series or table is truncated.
const MAX_RENDERED_ROWS: usize = 30;

/// Width of the longest bar in a rendered chart.
const CHART_WIDTH: usize = 40;

/// Maximum rendered cell width.
const MAX_CELL_WIDTH: usize = 24;

/// A labelled one-dimensional sequence of values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: Option<String>,
    pub index: Vec<Value>,
    pub values: Vec<Value>,
}

impl Series {
    pub fn new(name: Option<String>, index: Vec<Value>, values: Vec<Value>) -> Self {
        Self {
            name,
            index,
            values,
        }
    }

    /// A table column with a positional index.
    pub fn from_column(column: &Column) -> Self {
        Self::new(
            Some(column.name.clone()),
            positional_index(column.values.len()),
            column.values.clone(),
        )
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Keep the entries at the given positions, in order.
    pub fn take(&self, positions: &[usize]) -> Series {
        Series::new(
            self.name.clone(),
            positions.iter().map(|&p| self.index[p].clone()).collect(),
            positions.iter().map(|&p| self.values[p].clone()).collect(),
        )
    }

    /// Look up a value by index label.
    pub fn get(&self, label: &Value) -> Option<&Value> {
        self.index
            .iter()
            .position(|i| i == label)
            .map(|p| &self.values[p])
    }
}

pub fn positional_index(len: usize) -> Vec<Value> {
    (0..len).map(|i| Value::Number(i as f64)).collect()
}

/// Which columns of a group-by are selected.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupSelection {
    All,
    Column(String),
    Columns(Vec<String>),
}

/// A table grouped by one key column.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouped {
    pub table: Table,
    pub key: String,
    pub selection: GroupSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Barh,
    Line,
    Area,
    Pie,
    Scatter,
    Hist,
}

impl ChartKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bar" => Some(ChartKind::Bar),
            "barh" => Some(ChartKind::Barh),
            "line" => Some(ChartKind::Line),
            "area" => Some(ChartKind::Area),
            "pie" => Some(ChartKind::Pie),
            "scatter" => Some(ChartKind::Scatter),
            "hist" => Some(ChartKind::Hist),
            _ => None,
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartKind::Bar => "bar",
            ChartKind::Barh => "barh",
            ChartKind::Line => "line",
            ChartKind::Area => "area",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
            ChartKind::Hist => "hist",
        };
        write!(f, "{}", name)
    }
}

/// A chart produced by a `plot` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub colors: Vec<String>,
}

/// Result of evaluating one expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Scalar(Value),
    Series(Series),
    Frame(Table),
    Grouped(Grouped),
    List(Vec<Value>),
    Map(serde_json::Value),
    Chart(ChartSpec),
    /// Positional indexer returned by `.iloc`.
    Indexer(Table),
    /// The table-library handle (`pd`).
    Library,
}

impl Output {
    pub fn type_name(&self) -> &'static str {
        match self {
            Output::Scalar(_) => "scalar",
            Output::Series(_) => "Series",
            Output::Frame(_) => "DataFrame",
            Output::Grouped(_) => "DataFrameGroupBy",
            Output::List(_) => "list",
            Output::Map(_) => "dict",
            Output::Chart(_) => "chart",
            Output::Indexer(_) => "iLocIndexer",
            Output::Library => "module",
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Scalar(v) => write!(f, "{}", v),
            Output::Series(s) => write!(f, "{}", render_series(s)),
            Output::Frame(t) => write!(f, "{}", render_table(t)),
            Output::Grouped(g) => write!(f, "<DataFrameGroupBy by '{}'>", g.key),
            Output::List(values) => write!(f, "{}", render_list(values)),
            Output::Map(map) => write!(f, "{}", map),
            Output::Chart(chart) => write!(f, "{}", render_chart(chart)),
            Output::Indexer(_) => write!(f, "<iLocIndexer>"),
            Output::Library => write!(f, "<module 'pd'>"),
        }
    }
}

/// Everything a snippet produced, one output per statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionOutcome {
    pub outputs: Vec<Output>,
}

impl ExecutionOutcome {
    /// Output of the final statement.
    pub fn last(&self) -> Option<&Output> {
        self.outputs.last()
    }

    pub fn charts(&self) -> impl Iterator<Item = &ChartSpec> {
        self.outputs.iter().filter_map(|o| match o {
            Output::Chart(chart) => Some(chart),
            _ => None,
        })
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.outputs.iter().map(|o| o.to_string()).collect();
        write!(f, "{}", rendered.join("\n"))
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() > MAX_CELL_WIDTH {
        let mut clipped: String = text.chars().take(MAX_CELL_WIDTH - 1).collect();
        clipped.push('…');
        clipped
    } else {
        text.to_string()
    }
}

fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    format!("{}{}", text, " ".repeat(width.saturating_sub(len)))
}

fn render_series(series: &Series) -> String {
    let shown = series.len().min(MAX_RENDERED_ROWS);
    let labels: Vec<String> = series.index[..shown]
        .iter()
        .map(|v| clip(&v.to_string()))
        .collect();
    let width = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);

    let mut lines: Vec<String> = labels
        .iter()
        .zip(&series.values[..shown])
        .map(|(label, value)| format!("{}    {}", pad(label, width), value))
        .collect();

    if series.len() > shown {
        lines.push(format!("... ({} entries total)", series.len()));
    }
    if let Some(name) = &series.name {
        lines.push(format!("Name: {}, Length: {}", name, series.len()));
    }
    lines.join("\n")
}

fn render_table(table: &Table) -> String {
    let rows = table.n_rows();
    let shown = rows.min(MAX_RENDERED_ROWS);
    let index_width = shown.saturating_sub(1).to_string().len();

    let cells: Vec<Vec<String>> = table
        .columns
        .iter()
        .map(|c| c.values[..shown].iter().map(|v| clip(&v.to_string())).collect())
        .collect();
    let widths: Vec<usize> = table
        .columns
        .iter()
        .zip(&cells)
        .map(|(c, col_cells)| {
            col_cells
                .iter()
                .map(|s| s.chars().count())
                .chain(std::iter::once(clip(&c.name).chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut lines = Vec::new();
    let header: Vec<String> = table
        .columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| pad(&clip(&c.name), *w))
        .collect();
    lines.push(format!("{}  {}", " ".repeat(index_width), header.join("  ")));

    for row in 0..shown {
        let line: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(col_cells, w)| pad(&col_cells[row], *w))
            .collect();
        lines.push(format!("{}  {}", pad(&row.to_string(), index_width), line.join("  ")));
    }

    if rows > shown {
        lines.push("...".to_string());
    }
    lines.push(format!("[{} rows x {} columns]", rows, table.n_cols()));
    lines
        .into_iter()
        .map(|l| l.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_list(values: &[Value]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::Text(s) => format!("'{}'", s),
            other => other.to_string(),
        })
        .collect();
    format!("[{}]", items.join(", "))
}

/// Render a chart as horizontal text bars.
pub fn render_chart(chart: &ChartSpec) -> String {
    let mut lines = Vec::new();
    let title = chart
        .title
        .clone()
        .unwrap_or_else(|| match (&chart.y_label, &chart.x_label) {
            (Some(y), Some(x)) => format!("{} of {} by {}", chart.kind, y, x),
            (Some(y), None) => format!("{} of {}", chart.kind, y),
            _ => format!("{} chart", chart.kind),
        });
    lines.push(title);

    let max = chart
        .values
        .iter()
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let label_width = chart
        .labels
        .iter()
        .take(MAX_RENDERED_ROWS)
        .map(|l| clip(l).chars().count())
        .max()
        .unwrap_or(0);

    for (label, value) in chart.labels.iter().zip(&chart.values).take(MAX_RENDERED_ROWS) {
        let len = if max > 0.0 {
            ((value.abs() / max) * CHART_WIDTH as f64).round() as usize
        } else {
            0
        };
        lines.push(format!(
            "{} | {} {}",
            pad(&clip(label), label_width),
            "█".repeat(len),
            Value::Number(*value)
        ));
    }
    if chart.labels.len() > MAX_RENDERED_ROWS {
        lines.push(format!("... ({} points total)", chart.labels.len()));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_series_includes_name() {
        let series = Series::new(
            Some("sale_price".into()),
            vec![Value::from("canada"), Value::from("france")],
            vec![Value::Number(15.0), Value::Number(30.5)],
        );
        let rendered = render_series(&series);
        assert!(rendered.contains("canada    15"));
        assert!(rendered.contains("france    30.5"));
        assert!(rendered.contains("Name: sale_price"));
    }

    #[test]
    fn test_render_table_shape_footer() {
        let table = Table::new(vec![
            Column::new("a", vec![Value::Number(1.0), Value::Number(2.0)]),
            Column::new("b", vec![Value::from("x"), Value::Null]),
        ]);
        let rendered = render_table(&table);
        assert!(rendered.starts_with("   a  b"));
        assert!(rendered.contains("[2 rows x 2 columns]"));
        assert!(rendered.contains("NaN"));
    }

    #[test]
    fn test_render_chart_scales_bars() {
        let chart = ChartSpec {
            kind: ChartKind::Bar,
            title: None,
            x_label: Some("country".into()),
            y_label: Some("sale_price".into()),
            labels: vec!["a".into(), "b".into()],
            values: vec![10.0, 5.0],
            colors: vec![],
        };
        let rendered = render_chart(&chart);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "bar of sale_price by country");
        assert_eq!(lines[1].matches('█').count(), CHART_WIDTH);
        assert_eq!(lines[2].matches('█').count(), CHART_WIDTH / 2);
    }

    #[test]
    fn test_render_list_quotes_text() {
        assert_eq!(
            render_list(&[Value::from("a"), Value::Number(1.0)]),
            "['a', 1]"
        );
    }
}
