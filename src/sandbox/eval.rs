//! Evaluation of validated programs against an execution namespace.
//!
//! Only names bound in the [`Namespace`] are visible. Every operation is a
//! method of one of the [`Output`] kinds; anything else is an execution
//! error, never a fallthrough to ambient state.

use crate::data::table::{Column, OrderedValue, Table, Value};
use crate::error::{DataError, SandboxError};
use crate::sandbox::output::{
    positional_index, ChartKind, ChartSpec, ExecutionOutcome, GroupSelection, Grouped, Output,
    Series,
};
use crate::sandbox::parser::{Arg, BinOp, Expr, Program, Subscript};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

type EvalResult<T> = Result<T, SandboxError>;

fn err<T>(message: impl Into<String>) -> EvalResult<T> {
    Err(SandboxError::execution(message))
}

/// Names visible to a snippet. Built fresh for every execution.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    bindings: HashMap<String, Output>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard namespace: `df` bound to the table, `pd` to the library.
    pub fn for_table(table: Table) -> Self {
        Self::new()
            .bind("df", Output::Frame(table))
            .bind("pd", Output::Library)
    }

    pub fn bind(mut self, name: &str, value: Output) -> Self {
        self.bindings.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Output> {
        self.bindings.get(name)
    }
}

/// Run every statement of `program`, collecting one output per statement.
pub fn evaluate(program: &Program, namespace: &Namespace) -> EvalResult<ExecutionOutcome> {
    let evaluator = Evaluator { namespace };
    let outputs = program
        .statements
        .iter()
        .map(|stmt| evaluator.eval(stmt))
        .collect::<EvalResult<Vec<_>>>()?;
    Ok(ExecutionOutcome { outputs })
}

struct Evaluator<'a> {
    namespace: &'a Namespace,
}

impl<'a> Evaluator<'a> {
    fn eval(&self, expr: &Expr) -> EvalResult<Output> {
        match expr {
            Expr::Name(name) => match self.namespace.get(name) {
                Some(value) => Ok(value.clone()),
                None => err(format!("NameError: name '{}' is not defined", name)),
            },
            Expr::Number(n) => Ok(Output::Scalar(Value::Number(*n))),
            Expr::Str(s) => Ok(Output::Scalar(Value::Text(s.clone()))),
            Expr::Bool(b) => Ok(Output::Scalar(Value::Bool(*b))),
            Expr::None => Ok(Output::Scalar(Value::Null)),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.eval(item)? {
                        Output::Scalar(v) => values.push(v),
                        other => {
                            return err(format!(
                                "TypeError: list items must be scalars, got {}",
                                other.type_name()
                            ))
                        }
                    }
                }
                Ok(Output::List(values))
            }
            Expr::Attr { target, name } => attribute(self.eval(target)?, name),
            Expr::Call { callee, args } => self.call(callee, args),
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                self.subscript(target, index)
            }
            Expr::Neg(inner) => negate(self.eval(inner)?),
            Expr::Binary { op, lhs, rhs } => binary(*op, self.eval(lhs)?, self.eval(rhs)?),
        }
    }

    fn call(&self, callee: &Expr, args: &[Arg]) -> EvalResult<Output> {
        let mut evaluated = Args::default();
        for arg in args {
            let value = self.eval(&arg.value)?;
            match &arg.name {
                Some(name) => evaluated.keyword.push((name.clone(), value)),
                None => evaluated.positional.push(value),
            }
        }

        match callee {
            Expr::Attr { target, name } => call_method(self.eval(target)?, name, evaluated),
            Expr::Name(name) if name == "print" => {
                evaluated.check("print", 1, &[])?;
                evaluated
                    .positional
                    .into_iter()
                    .next()
                    .ok_or_else(|| SandboxError::execution("print() expects one argument"))
            }
            Expr::Name(name) if name == "len" => {
                evaluated.check("len", 1, &[])?;
                let len = match evaluated.positional.first() {
                    Some(Output::Frame(t)) => t.n_rows(),
                    Some(Output::Series(s)) => s.len(),
                    Some(Output::List(v)) => v.len(),
                    Some(other) => {
                        return err(format!(
                            "TypeError: object of type '{}' has no len()",
                            other.type_name()
                        ))
                    }
                    None => return err("len() expects one argument"),
                };
                Ok(Output::Scalar(Value::Number(len as f64)))
            }
            Expr::Name(name) => err(format!("NameError: '{}' is not callable", name)),
            _ => err("TypeError: expression is not callable"),
        }
    }

    fn subscript(&self, target: Output, index: &Subscript) -> EvalResult<Output> {
        let slice = match index {
            Subscript::Slice { start, end } => Some((
                self.optional_int(start.as_ref())?,
                self.optional_int(end.as_ref())?,
            )),
            Subscript::Expr(_) => None,
        };

        match (target, index, slice) {
            (Output::Frame(t), _, Some((start, end)))
            | (Output::Indexer(t), _, Some((start, end))) => {
                let rows: Vec<usize> = resolve_slice(start, end, t.n_rows()).collect();
                Ok(Output::Frame(t.take_rows(&rows)))
            }
            (Output::Series(s), _, Some((start, end))) => {
                let rows: Vec<usize> = resolve_slice(start, end, s.len()).collect();
                Ok(Output::Series(s.take(&rows)))
            }
            (Output::Frame(t), Subscript::Expr(e), None) => frame_index(t, self.eval(e)?),
            (Output::Indexer(t), Subscript::Expr(e), None) => iloc_index(t, self.eval(e)?),
            (Output::Series(s), Subscript::Expr(e), None) => series_index(s, self.eval(e)?),
            (Output::Grouped(g), Subscript::Expr(e), None) => grouped_index(g, self.eval(e)?),
            (Output::List(values), Subscript::Expr(e), None) => {
                let position = as_int(&self.eval(e)?, "list index")?;
                let i = resolve_position(position, values.len())?;
                Ok(Output::Scalar(values[i].clone()))
            }
            (other, _, _) => err(format!(
                "TypeError: '{}' object is not subscriptable",
                other.type_name()
            )),
        }
    }

    fn optional_int(&self, expr: Option<&Expr>) -> EvalResult<Option<i64>> {
        match expr {
            None => Ok(None),
            Some(e) => match self.eval(e)? {
                Output::Scalar(Value::Null) => Ok(None),
                other => as_int(&other, "slice bound").map(Some),
            },
        }
    }
}

/// Evaluated call arguments.
#[derive(Debug, Default)]
struct Args {
    positional: Vec<Output>,
    keyword: Vec<(String, Output)>,
}

impl Args {
    /// Reject surplus positional arguments and unknown keywords.
    fn check(&self, method: &str, max_positional: usize, keywords: &[&str]) -> EvalResult<()> {
        if self.positional.len() > max_positional {
            return err(format!(
                "TypeError: {}() takes at most {} positional argument(s)",
                method, max_positional
            ));
        }
        if let Some((name, _)) = self
            .keyword
            .iter()
            .find(|(name, _)| !keywords.contains(&name.as_str()))
        {
            return err(format!(
                "TypeError: {}() got an unexpected keyword argument '{}'",
                method, name
            ));
        }
        Ok(())
    }

    fn get(&self, position: usize, name: &str) -> Option<&Output> {
        self.keyword
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .or_else(|| self.positional.get(position))
    }

    fn usize_or(&self, position: usize, name: &str, default: usize) -> EvalResult<usize> {
        match self.get(position, name) {
            None => Ok(default),
            Some(value) => {
                let n = as_int(value, name)?;
                usize::try_from(n).or_else(|_| err(format!("ValueError: {} must be >= 0", name)))
            }
        }
    }

    fn bool_or(&self, position: usize, name: &str, default: bool) -> EvalResult<bool> {
        match self.get(position, name) {
            None => Ok(default),
            Some(Output::Scalar(Value::Bool(b))) => Ok(*b),
            Some(other) => err(format!(
                "TypeError: {} must be True or False, got {}",
                name,
                other.type_name()
            )),
        }
    }

    fn string(&self, position: usize, name: &str) -> EvalResult<Option<String>> {
        match self.get(position, name) {
            None | Some(Output::Scalar(Value::Null)) => Ok(None),
            Some(Output::Scalar(Value::Text(s))) => Ok(Some(s.clone())),
            Some(other) => err(format!(
                "TypeError: {} must be a string, got {}",
                name,
                other.type_name()
            )),
        }
    }

    /// A string or a list of strings.
    fn strings(&self, position: usize, name: &str) -> EvalResult<Option<Vec<String>>> {
        match self.get(position, name) {
            None | Some(Output::Scalar(Value::Null)) => Ok(None),
            Some(Output::Scalar(Value::Text(s))) => Ok(Some(vec![s.clone()])),
            Some(Output::List(values)) => values
                .iter()
                .map(|v| match v {
                    Value::Text(s) => Ok(s.clone()),
                    other => err(format!("TypeError: {} entries must be strings, got {}", name, other)),
                })
                .collect::<EvalResult<Vec<_>>>()
                .map(Some),
            Some(other) => err(format!(
                "TypeError: {} must be a string or list of strings, got {}",
                name,
                other.type_name()
            )),
        }
    }
}

fn as_int(value: &Output, what: &str) -> EvalResult<i64> {
    match value {
        Output::Scalar(Value::Number(n)) if n.fract() == 0.0 => Ok(*n as i64),
        other => err(format!("TypeError: {} must be an integer, got {}", what, other)),
    }
}

fn resolve_position(position: i64, len: usize) -> EvalResult<usize> {
    let resolved = if position < 0 {
        len as i64 + position
    } else {
        position
    };
    if resolved < 0 || resolved as usize >= len {
        return err(format!("IndexError: position {} is out of bounds", position));
    }
    Ok(resolved as usize)
}

fn resolve_slice(start: Option<i64>, end: Option<i64>, len: usize) -> std::ops::Range<usize> {
    let clamp = |bound: i64| -> usize {
        if bound < 0 {
            (len as i64 + bound).max(0) as usize
        } else {
            (bound as usize).min(len)
        }
    };
    let start = start.map(clamp).unwrap_or(0);
    let end = end.map(clamp).unwrap_or(len);
    start..end.max(start)
}

// ── attributes and subscripts ────────────────────────────────────────────────

fn attribute(target: Output, name: &str) -> EvalResult<Output> {
    match (target, name) {
        (Output::Frame(t), "iloc") => Ok(Output::Indexer(t)),
        (Output::Frame(t), "columns") => Ok(Output::List(
            t.column_names().into_iter().map(Value::Text).collect(),
        )),
        (Output::Frame(t), "shape") => Ok(Output::List(vec![
            Value::Number(t.n_rows() as f64),
            Value::Number(t.n_cols() as f64),
        ])),
        (Output::Series(s), "iloc") => Ok(Output::Series(s)),
        (Output::Series(s), "index") => Ok(Output::List(s.index)),
        (Output::Series(s), "values") => Ok(Output::List(s.values)),
        (Output::Series(s), "shape") => Ok(Output::List(vec![Value::Number(s.len() as f64)])),
        (Output::Series(s), "name") => Ok(Output::Scalar(
            s.name.map(Value::Text).unwrap_or(Value::Null),
        )),
        (Output::Frame(t), name) => match t.column(name) {
            Some(column) => Ok(Output::Series(Series::from_column(column))),
            None => err(format!(
                "AttributeError: 'DataFrame' object has no attribute '{}'",
                name
            )),
        },
        (other, name) => err(format!(
            "AttributeError: '{}' object has no attribute '{}'",
            other.type_name(),
            name
        )),
    }
}

fn frame_index(table: Table, key: Output) -> EvalResult<Output> {
    match key {
        Output::Scalar(Value::Text(name)) => {
            let column = table
                .column(&name)
                .ok_or_else(|| DataError::MissingColumns {
                    columns: vec![name.clone()],
                })?;
            Ok(Output::Series(Series::from_column(column)))
        }
        Output::List(values) => {
            let names = values
                .into_iter()
                .map(|v| match v {
                    Value::Text(s) => Ok(s),
                    other => err(format!("KeyError: column labels must be strings, got {}", other)),
                })
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(Output::Frame(table.select(&names)?))
        }
        Output::Series(mask) => {
            let rows = mask_rows(&mask, table.n_rows())?;
            Ok(Output::Frame(table.take_rows(&rows)))
        }
        other => err(format!("KeyError: {}", other)),
    }
}

fn iloc_index(table: Table, key: Output) -> EvalResult<Output> {
    match key {
        Output::Scalar(_) => {
            let position = as_int(&key, "iloc position")?;
            let row = resolve_position(position, table.n_rows())?;
            let cells = table.row(row).unwrap_or_default();
            let (index, values): (Vec<Value>, Vec<Value>) = cells
                .into_iter()
                .map(|(name, value)| (Value::Text(name), value))
                .unzip();
            Ok(Output::Series(Series::new(
                Some(row.to_string()),
                index,
                values,
            )))
        }
        Output::List(values) => {
            let rows = values
                .iter()
                .map(|v| {
                    as_int(&Output::Scalar(v.clone()), "iloc position")
                        .and_then(|p| resolve_position(p, table.n_rows()))
                })
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(Output::Frame(table.take_rows(&rows)))
        }
        other => err(format!(
            "TypeError: cannot index by position with {}",
            other.type_name()
        )),
    }
}

fn series_index(series: Series, key: Output) -> EvalResult<Output> {
    match key {
        Output::Series(mask) => {
            let rows = mask_rows(&mask, series.len())?;
            Ok(Output::Series(series.take(&rows)))
        }
        Output::Scalar(label) => match series.get(&label) {
            Some(value) => Ok(Output::Scalar(value.clone())),
            None => err(format!("KeyError: {}", label)),
        },
        other => err(format!("KeyError: {}", other)),
    }
}

fn grouped_index(grouped: Grouped, key: Output) -> EvalResult<Output> {
    let selection = match key {
        Output::Scalar(Value::Text(name)) => {
            grouped.table.require_columns(std::slice::from_ref(&name))?;
            GroupSelection::Column(name)
        }
        Output::List(values) => {
            let names: Vec<String> = values.iter().map(Value::key_string).collect();
            grouped.table.require_columns(&names)?;
            GroupSelection::Columns(names)
        }
        other => return err(format!("KeyError: {}", other)),
    };
    Ok(Output::Grouped(Grouped {
        selection,
        ..grouped
    }))
}

fn mask_rows(mask: &Series, len: usize) -> EvalResult<Vec<usize>> {
    if mask.len() != len {
        return err(format!(
            "ValueError: boolean mask has length {} but data has {} rows",
            mask.len(),
            len
        ));
    }
    if !mask.values.iter().all(|v| matches!(v, Value::Bool(_) | Value::Null)) {
        return err("TypeError: row selection requires a boolean mask");
    }
    Ok(mask
        .values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_truthy())
        .map(|(i, _)| i)
        .collect())
}

// ── method dispatch ──────────────────────────────────────────────────────────

fn call_method(target: Output, name: &str, args: Args) -> EvalResult<Output> {
    match target {
        Output::Frame(table) => frame_method(table, name, args),
        Output::Series(series) => series_method(series, name, args),
        Output::Grouped(grouped) => grouped_method(grouped, name, args),
        Output::Library => library_call(name, args),
        other => err(format!(
            "AttributeError: '{}' object has no method '{}'",
            other.type_name(),
            name
        )),
    }
}

/// Aggregation functions shared by series, frames and group-bys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Agg {
    Mean,
    Sum,
    Min,
    Max,
    Std,
    Median,
    Count,
    Nunique,
}

impl Agg {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "mean" => Some(Agg::Mean),
            "sum" => Some(Agg::Sum),
            "min" => Some(Agg::Min),
            "max" => Some(Agg::Max),
            "std" => Some(Agg::Std),
            "median" => Some(Agg::Median),
            "count" => Some(Agg::Count),
            "nunique" => Some(Agg::Nunique),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Agg::Mean => "mean",
            Agg::Sum => "sum",
            Agg::Min => "min",
            Agg::Max => "max",
            Agg::Std => "std",
            Agg::Median => "median",
            Agg::Count => "count",
            Agg::Nunique => "nunique",
        }
    }

    /// Aggregations that only make sense on numeric data.
    fn numeric_only(&self) -> bool {
        matches!(self, Agg::Mean | Agg::Sum | Agg::Std | Agg::Median)
    }

    fn apply(&self, values: &[Value], column: &str) -> EvalResult<Value> {
        let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
        match self {
            Agg::Count => return Ok(Value::Number(present.len() as f64)),
            Agg::Nunique => {
                let distinct: HashSet<String> = present.iter().map(|v| v.key_string()).collect();
                return Ok(Value::Number(distinct.len() as f64));
            }
            Agg::Min | Agg::Max => {
                let all_text = present.iter().all(|v| matches!(v, Value::Text(_)));
                let all_numeric = present.iter().all(|v| v.as_f64().is_some());
                if !all_text && !all_numeric {
                    return err(format!(
                        "TypeError: cannot compare mixed values in column '{}'",
                        column
                    ));
                }
                let pick = present.into_iter().reduce(|a, b| {
                    let ord = a.sort_cmp(b);
                    match (self, ord) {
                        (Agg::Min, Ordering::Greater) | (Agg::Max, Ordering::Less) => b,
                        _ => a,
                    }
                });
                return Ok(pick.cloned().unwrap_or(Value::Null));
            }
            _ => {}
        }

        let numbers = present
            .iter()
            .map(|v| v.as_f64())
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| {
                SandboxError::execution(format!(
                    "TypeError: cannot compute {} of non-numeric column '{}'",
                    self.name(),
                    column
                ))
            })?;

        let n = numbers.len() as f64;
        let result = match self {
            Agg::Sum => numbers.iter().sum(),
            Agg::Mean if numbers.is_empty() => f64::NAN,
            Agg::Mean => numbers.iter().sum::<f64>() / n,
            Agg::Std if numbers.len() < 2 => f64::NAN,
            Agg::Std => {
                let mean = numbers.iter().sum::<f64>() / n;
                let variance =
                    numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
                variance.sqrt()
            }
            Agg::Median if numbers.is_empty() => f64::NAN,
            Agg::Median => {
                let mut sorted = numbers.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            Agg::Count | Agg::Nunique | Agg::Min | Agg::Max => unreachable!("handled above"),
        };
        Ok(Value::from(result))
    }
}

fn frame_method(table: Table, name: &str, args: Args) -> EvalResult<Output> {
    match name {
        "head" | "tail" => {
            args.check(name, 1, &["n"])?;
            let n = args.usize_or(0, "n", 5)?.min(table.n_rows());
            let rows: Vec<usize> = if name == "head" {
                (0..n).collect()
            } else {
                (table.n_rows() - n..table.n_rows()).collect()
            };
            Ok(Output::Frame(table.take_rows(&rows)))
        }
        "groupby" => {
            args.check(name, 1, &["by"])?;
            let by = args
                .strings(0, "by")?
                .ok_or_else(|| SandboxError::execution("TypeError: groupby() requires 'by'"))?;
            let [key] = by.as_slice() else {
                return err("ValueError: grouping by more than one column is not supported");
            };
            table.require_columns(std::slice::from_ref(key))?;
            Ok(Output::Grouped(Grouped {
                key: key.clone(),
                table,
                selection: GroupSelection::All,
            }))
        }
        "sort_values" => {
            args.check(name, 2, &["by", "ascending"])?;
            let by = args.strings(0, "by")?.ok_or_else(|| {
                SandboxError::execution("TypeError: sort_values() requires 'by'")
            })?;
            let ascending = args.bool_or(1, "ascending", true)?;
            table.require_columns(&by)?;
            let keys: Vec<&Column> = by.iter().filter_map(|n| table.column(n)).collect();

            let mut rows: Vec<usize> = (0..table.n_rows()).collect();
            rows.sort_by(|&a, &b| {
                keys.iter()
                    .map(|c| directional_cmp(&c.values[a], &c.values[b], ascending))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
            Ok(Output::Frame(table.take_rows(&rows)))
        }
        "dropna" => {
            args.check(name, 0, &[])?;
            let rows: Vec<usize> = (0..table.n_rows())
                .filter(|&r| table.columns.iter().all(|c| !c.values[r].is_null()))
                .collect();
            Ok(Output::Frame(table.take_rows(&rows)))
        }
        "to_dict" => {
            args.check(name, 0, &[])?;
            let map: serde_json::Map<String, serde_json::Value> = table
                .columns
                .iter()
                .map(|c| {
                    let inner: serde_json::Map<String, serde_json::Value> = c
                        .values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| (i.to_string(), to_json(v)))
                        .collect();
                    (c.name.clone(), serde_json::Value::Object(inner))
                })
                .collect();
            Ok(Output::Map(serde_json::Value::Object(map)))
        }
        "plot" => plot_frame(&table, &args).map(Output::Chart),
        agg_name => {
            let Some(agg) = Agg::from_name(agg_name) else {
                return err(format!(
                    "AttributeError: 'DataFrame' object has no attribute '{}'",
                    agg_name
                ));
            };
            args.check(name, 0, &["numeric_only"])?;
            let mut index = Vec::new();
            let mut values = Vec::new();
            for column in &table.columns {
                if agg.numeric_only() && !column.is_numeric() {
                    continue;
                }
                index.push(Value::Text(column.name.clone()));
                values.push(agg.apply(&column.values, &column.name)?);
            }
            Ok(Output::Series(Series::new(None, index, values)))
        }
    }
}

fn series_method(series: Series, name: &str, args: Args) -> EvalResult<Output> {
    let label = series.name.clone().unwrap_or_default();
    match name {
        "head" | "tail" => {
            args.check(name, 1, &["n"])?;
            let n = args.usize_or(0, "n", 5)?.min(series.len());
            let rows: Vec<usize> = if name == "head" {
                (0..n).collect()
            } else {
                (series.len() - n..series.len()).collect()
            };
            Ok(Output::Series(series.take(&rows)))
        }
        "sort_values" => {
            args.check(name, 1, &["ascending"])?;
            let ascending = args.bool_or(0, "ascending", true)?;
            let mut rows: Vec<usize> = (0..series.len()).collect();
            rows.sort_by(|&a, &b| {
                directional_cmp(&series.values[a], &series.values[b], ascending)
            });
            Ok(Output::Series(series.take(&rows)))
        }
        "dropna" => {
            args.check(name, 0, &[])?;
            let rows: Vec<usize> = (0..series.len())
                .filter(|&i| !series.values[i].is_null())
                .collect();
            Ok(Output::Series(series.take(&rows)))
        }
        "round" => {
            args.check(name, 1, &["decimals"])?;
            let decimals = args.usize_or(0, "decimals", 0)? as i32;
            let factor = 10f64.powi(decimals);
            let values = series
                .values
                .iter()
                .map(|v| match v {
                    Value::Number(n) => Value::Number((n * factor).round() / factor),
                    other => other.clone(),
                })
                .collect();
            Ok(Output::Series(Series { values, ..series }))
        }
        "unique" => {
            args.check(name, 0, &[])?;
            let mut seen = HashSet::new();
            let values = series
                .values
                .iter()
                .filter(|v| !v.is_null() && seen.insert(v.key_string()))
                .cloned()
                .collect();
            Ok(Output::List(values))
        }
        "mode" => {
            args.check(name, 0, &[])?;
            let counts = value_counts(&series.values);
            let top = counts.values().copied().max().unwrap_or(0);
            let modes = counts
                .into_iter()
                .filter(|(_, c)| *c == top)
                .map(|(v, _)| v.0)
                .collect();
            Ok(Output::List(modes))
        }
        "value_counts" => {
            args.check(name, 0, &["ascending"])?;
            let ascending = args.bool_or(0, "ascending", false)?;
            let mut counts: Vec<(Value, usize)> = value_counts(&series.values)
                .into_iter()
                .map(|(v, c)| (v.0, c))
                .collect();
            counts.sort_by(|a, b| if ascending { a.1.cmp(&b.1) } else { b.1.cmp(&a.1) });
            let (index, values): (Vec<Value>, Vec<Value>) = counts
                .into_iter()
                .map(|(v, c)| (v, Value::Number(c as f64)))
                .unzip();
            Ok(Output::Series(Series::new(Some("count".into()), index, values)))
        }
        "idxmax" | "idxmin" => {
            args.check(name, 0, &[])?;
            let want = if name == "idxmax" {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            let best = (0..series.len())
                .filter(|&i| !series.values[i].is_null())
                .reduce(|a, b| {
                    if series.values[b].sort_cmp(&series.values[a]) == want {
                        b
                    } else {
                        a
                    }
                });
            match best {
                Some(i) => Ok(Output::Scalar(series.index[i].clone())),
                None => err(format!("ValueError: {} of an empty sequence", name)),
            }
        }
        "to_dict" => {
            args.check(name, 0, &[])?;
            let map: serde_json::Map<String, serde_json::Value> = series
                .index
                .iter()
                .zip(&series.values)
                .map(|(k, v)| (k.key_string(), to_json(v)))
                .collect();
            Ok(Output::Map(serde_json::Value::Object(map)))
        }
        "to_list" | "tolist" => {
            args.check(name, 0, &[])?;
            Ok(Output::List(series.values))
        }
        "reset_index" => {
            args.check(name, 0, &[])?;
            let value_name = series.name.clone().unwrap_or_else(|| "0".to_string());
            Ok(Output::Frame(Table::new(vec![
                Column::new("index", series.index),
                Column::new(value_name, series.values),
            ])))
        }
        "plot" => plot_series(&series, &args).map(Output::Chart),
        agg_name => {
            let Some(agg) = Agg::from_name(agg_name) else {
                return err(format!(
                    "AttributeError: 'Series' object has no attribute '{}'",
                    agg_name
                ));
            };
            args.check(name, 0, &[])?;
            agg.apply(&series.values, &label).map(Output::Scalar)
        }
    }
}

fn grouped_method(grouped: Grouped, name: &str, args: Args) -> EvalResult<Output> {
    let key_column = grouped
        .table
        .column(&grouped.key)
        .ok_or_else(|| SandboxError::execution(format!("KeyError: {}", grouped.key)))?;

    let mut groups: BTreeMap<OrderedValue, Vec<usize>> = BTreeMap::new();
    for (row, key) in key_column.values.iter().enumerate() {
        if !key.is_null() {
            groups.entry(OrderedValue(key.clone())).or_default().push(row);
        }
    }
    let keys: Vec<Value> = groups.keys().map(|k| k.0.clone()).collect();

    let agg_name = match name {
        "agg" | "aggregate" => {
            args.check(name, 1, &["func"])?;
            args.string(0, "func")?.ok_or_else(|| {
                SandboxError::execution("TypeError: agg() requires a function name")
            })?
        }
        other => {
            args.check(other, 0, &["numeric_only"])?;
            other.to_string()
        }
    };

    if agg_name == "size" {
        let values = groups
            .values()
            .map(|rows| Value::Number(rows.len() as f64))
            .collect();
        return Ok(Output::Series(Series::new(Some("size".into()), keys, values)));
    }

    let Some(agg) = Agg::from_name(&agg_name) else {
        return err(format!(
            "AttributeError: 'DataFrameGroupBy' object has no attribute '{}'",
            agg_name
        ));
    };

    let aggregate_column = |column: &Column| -> EvalResult<Vec<Value>> {
        groups
            .values()
            .map(|rows| {
                let cells: Vec<Value> = rows.iter().map(|&r| column.values[r].clone()).collect();
                agg.apply(&cells, &column.name)
            })
            .collect()
    };

    let selected: Vec<&Column> = match &grouped.selection {
        GroupSelection::Column(col) => {
            let column = grouped
                .table
                .column(col)
                .ok_or_else(|| SandboxError::execution(format!("KeyError: {}", col)))?;
            return Ok(Output::Series(Series::new(
                Some(col.clone()),
                keys,
                aggregate_column(column)?,
            )));
        }
        GroupSelection::Columns(cols) => cols
            .iter()
            .filter_map(|c| grouped.table.column(c))
            .collect(),
        GroupSelection::All => grouped
            .table
            .columns
            .iter()
            .filter(|c| c.name != grouped.key)
            .filter(|c| !agg.numeric_only() || c.is_numeric())
            .collect(),
    };

    let mut columns = vec![Column::new(grouped.key.clone(), keys)];
    for column in selected {
        columns.push(Column::new(column.name.clone(), aggregate_column(column)?));
    }
    Ok(Output::Frame(Table::new(columns)))
}

fn library_call(name: &str, args: Args) -> EvalResult<Output> {
    match name {
        "to_numeric" => {
            args.check(name, 1, &["errors"])?;
            let coerce = match args.string(1, "errors")?.as_deref() {
                None | Some("raise") => false,
                Some("coerce") => true,
                Some(other) => return err(format!("ValueError: invalid errors value '{}'", other)),
            };
            let convert = |v: &Value| -> EvalResult<Value> {
                match v {
                    Value::Text(s) => match s.trim().parse::<f64>() {
                        Ok(n) => Ok(Value::from(n)),
                        Err(_) if coerce => Ok(Value::Null),
                        Err(_) => err(format!("ValueError: unable to parse string \"{}\"", s)),
                    },
                    other => Ok(other.clone()),
                }
            };
            match args.get(0, "arg") {
                Some(Output::Series(s)) => {
                    let values = s.values.iter().map(convert).collect::<EvalResult<Vec<_>>>()?;
                    Ok(Output::Series(Series {
                        values,
                        ..s.clone()
                    }))
                }
                Some(Output::Scalar(v)) => convert(v).map(Output::Scalar),
                _ => err("TypeError: to_numeric() expects a Series or scalar"),
            }
        }
        other => err(format!(
            "AttributeError: module 'pd' has no attribute '{}'",
            other
        )),
    }
}

// ── plotting ─────────────────────────────────────────────────────────────────

const PLOT_KEYWORDS: &[&str] = &[
    "kind", "x", "y", "color", "title", "xlabel", "ylabel", "figsize", "legend", "rot", "grid",
];

fn plot_options(args: &Args) -> EvalResult<(ChartKind, Option<String>, Vec<String>)> {
    args.check("plot", 0, PLOT_KEYWORDS)?;
    let kind = match args.string(usize::MAX, "kind")? {
        None => ChartKind::Line,
        Some(name) => ChartKind::from_name(&name)
            .ok_or_else(|| SandboxError::execution(format!("ValueError: {} is not a valid plot kind", name)))?,
    };
    let title = args.string(usize::MAX, "title")?;
    let colors = args.strings(usize::MAX, "color")?.unwrap_or_default();
    Ok((kind, title, colors))
}

fn chart_values(values: &[Value], column: &str) -> EvalResult<Vec<f64>> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => Ok(0.0),
            other => other.as_f64().ok_or_else(|| {
                SandboxError::execution(format!(
                    "TypeError: no numeric data to plot in '{}'",
                    column
                ))
            }),
        })
        .collect()
}

fn plot_series(series: &Series, args: &Args) -> EvalResult<ChartSpec> {
    let (kind, title, colors) = plot_options(args)?;
    let name = series.name.clone().unwrap_or_else(|| "value".to_string());
    Ok(ChartSpec {
        kind,
        title,
        x_label: args.string(usize::MAX, "xlabel")?,
        y_label: args.string(usize::MAX, "ylabel")?.or(Some(name.clone())),
        labels: series.index.iter().map(|v| v.to_string()).collect(),
        values: chart_values(&series.values, &name)?,
        colors,
    })
}

fn plot_frame(table: &Table, args: &Args) -> EvalResult<ChartSpec> {
    let (kind, title, colors) = plot_options(args)?;
    let x = args.string(usize::MAX, "x")?;
    let y = match args.string(usize::MAX, "y")? {
        Some(y) => y,
        None => table
            .columns
            .iter()
            .find(|c| Some(&c.name) != x.as_ref() && c.is_numeric())
            .map(|c| c.name.clone())
            .ok_or_else(|| SandboxError::execution("TypeError: no numeric data to plot"))?,
    };

    let mut required = vec![y.clone()];
    required.extend(x.clone());
    table.require_columns(&required)?;

    let labels = match &x {
        Some(x) => table
            .column(x)
            .map(|c| c.values.iter().map(|v| v.to_string()).collect())
            .unwrap_or_default(),
        None => positional_index(table.n_rows())
            .iter()
            .map(|v| v.to_string())
            .collect(),
    };
    let y_column = table
        .column(&y)
        .ok_or_else(|| DataError::MissingColumns {
            columns: vec![y.clone()],
        })?;

    Ok(ChartSpec {
        kind,
        title,
        x_label: args.string(usize::MAX, "xlabel")?.or(x),
        y_label: args.string(usize::MAX, "ylabel")?.or(Some(y.clone())),
        labels,
        values: chart_values(&y_column.values, &y)?,
        colors,
    })
}

// ── operators ────────────────────────────────────────────────────────────────

fn negate(value: Output) -> EvalResult<Output> {
    let neg = |v: &Value| -> EvalResult<Value> {
        match v {
            Value::Null => Ok(Value::Null),
            Value::Number(n) => Ok(Value::Number(-n)),
            other => err(format!("TypeError: bad operand for unary -: '{}'", other)),
        }
    };
    match value {
        Output::Scalar(v) => neg(&v).map(Output::Scalar),
        Output::Series(s) => {
            let values = s.values.iter().map(neg).collect::<EvalResult<Vec<_>>>()?;
            Ok(Output::Series(Series { values, ..s }))
        }
        other => err(format!(
            "TypeError: bad operand type for unary -: '{}'",
            other.type_name()
        )),
    }
}

fn binary(op: BinOp, lhs: Output, rhs: Output) -> EvalResult<Output> {
    match (lhs, rhs) {
        (Output::Scalar(a), Output::Scalar(b)) => apply(op, &a, &b).map(Output::Scalar),
        (Output::Series(s), Output::Scalar(b)) => {
            let values = s
                .values
                .iter()
                .map(|a| apply(op, a, &b))
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(Output::Series(Series { values, ..s }))
        }
        (Output::Scalar(a), Output::Series(s)) => {
            let values = s
                .values
                .iter()
                .map(|b| apply(op, &a, b))
                .collect::<EvalResult<Vec<_>>>()?;
            Ok(Output::Series(Series { values, ..s }))
        }
        (Output::Series(l), Output::Series(r)) => {
            if l.len() != r.len() {
                return err(format!(
                    "ValueError: operands have different lengths ({} and {})",
                    l.len(),
                    r.len()
                ));
            }
            let values = l
                .values
                .iter()
                .zip(&r.values)
                .map(|(a, b)| apply(op, a, b))
                .collect::<EvalResult<Vec<_>>>()?;
            let name = if l.name == r.name { l.name } else { None };
            Ok(Output::Series(Series::new(name, l.index, values)))
        }
        (l, r) => err(format!(
            "TypeError: unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            l.type_name(),
            r.type_name()
        )),
    }
}

fn apply(op: BinOp, a: &Value, b: &Value) -> EvalResult<Value> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
            if a.is_null() || b.is_null() {
                return Ok(Value::Null);
            }
            if let (BinOp::Add, Value::Text(x), Value::Text(y)) = (op, a, b) {
                return Ok(Value::Text(format!("{}{}", x, y)));
            }
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                return err(format!(
                    "TypeError: unsupported operand type(s) for {}: '{}' and '{}'",
                    op.symbol(),
                    a,
                    b
                ));
            };
            let result = match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                _ => x / y,
            };
            Ok(Value::from(result))
        }
        BinOp::Eq => Ok(Value::Bool(values_equal(a, b))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(a, b))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            if a.is_null() || b.is_null() {
                return Ok(Value::Bool(false));
            }
            let comparable = matches!(
                (a, b),
                (Value::Text(_), Value::Text(_))
            ) || (a.as_f64().is_some() && b.as_f64().is_some());
            if !comparable {
                return err(format!(
                    "TypeError: '{}' not supported between '{}' and '{}'",
                    op.symbol(),
                    a,
                    b
                ));
            }
            let ord = match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.sort_cmp(b),
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinOp::And => Ok(Value::Bool(a.is_truthy() && b.is_truthy())),
        BinOp::Or => Ok(Value::Bool(a.is_truthy() || b.is_truthy())),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => !a.is_null() && a == b,
    }
}

/// Sort order with missing values always last.
fn directional_cmp(a: &Value, b: &Value, ascending: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ if ascending => a.sort_cmp(b),
        _ => b.sort_cmp(a),
    }
}

/// Occurrence counts of non-missing values, keyed in sort order.
fn value_counts(values: &[Value]) -> BTreeMap<OrderedValue, usize> {
    let mut counts = BTreeMap::new();
    for value in values.iter().filter(|v| !v.is_null()) {
        *counts.entry(OrderedValue(value.clone())).or_insert(0) += 1;
    }
    counts
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Number(n) => json!(n),
        Value::Text(s) => json!(s),
    }
}
