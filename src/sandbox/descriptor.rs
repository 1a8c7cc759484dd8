//! Structured operation descriptors.
//!
//! Instead of free-form code a model may answer with a JSON pipeline:
//!
//! ```json
//! {"steps": [{"op": "groupby", "by": "country"},
//!            {"op": "column", "name": "sale_price"},
//!            {"op": "aggregate", "func": "mean"}]}
//! ```
//!
//! Descriptors are validated by shape during deserialization and lowered onto
//! the same expression tree the parser produces.

use crate::error::SandboxError;
use crate::sandbox::parser::{Arg, BinOp, Expr, Program};
use serde::{Deserialize, Serialize};

/// Longest pipeline a descriptor may describe.
pub const MAX_STEPS: usize = 16;

/// Each filter repeats the pipeline so far inside its mask.
pub const MAX_FILTERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationDescriptor {
    /// Namespace name the pipeline starts from.
    #[serde(default = "default_source")]
    pub source: String,
    pub steps: Vec<Step>,
}

fn default_source() -> String {
    "df".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rows() -> usize {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl From<Comparison> for BinOp {
    fn from(cmp: Comparison) -> Self {
        match cmp {
            Comparison::Eq => BinOp::Eq,
            Comparison::Ne => BinOp::Ne,
            Comparison::Lt => BinOp::Lt,
            Comparison::Le => BinOp::Le,
            Comparison::Gt => BinOp::Gt,
            Comparison::Ge => BinOp::Ge,
        }
    }
}

/// One pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Select a single column as a series.
    Column { name: String },
    /// Project onto several columns.
    Select { columns: Vec<String> },
    /// Keep rows where `column <cmp> value`.
    Filter {
        column: String,
        cmp: Comparison,
        value: serde_json::Value,
    },
    Groupby { by: String },
    Aggregate { func: String },
    Sort {
        #[serde(default)]
        by: Option<Vec<String>>,
        #[serde(default = "default_true")]
        ascending: bool,
    },
    Head {
        #[serde(default = "default_rows")]
        n: usize,
    },
    Tail {
        #[serde(default = "default_rows")]
        n: usize,
    },
    Plot {
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        x: Option<String>,
        #[serde(default)]
        y: Option<String>,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        title: Option<String>,
    },
}

impl OperationDescriptor {
    /// Parse a JSON snippet.
    pub fn from_json(snippet: &str) -> Result<Self, SandboxError> {
        serde_json::from_str(snippet)
            .map_err(|e| SandboxError::syntax(format!("invalid operation descriptor: {}", e)))
    }

    /// Lower the pipeline to a one-statement program.
    pub fn lower(&self) -> Result<Program, SandboxError> {
        if self.steps.is_empty() {
            return Err(SandboxError::syntax("operation descriptor has no steps"));
        }
        if self.steps.len() > MAX_STEPS {
            return Err(SandboxError::syntax(format!(
                "operation descriptor has {} steps, at most {} are allowed",
                self.steps.len(),
                MAX_STEPS
            )));
        }
        let filters = self
            .steps
            .iter()
            .filter(|step| matches!(step, Step::Filter { .. }))
            .count();
        if filters > MAX_FILTERS {
            return Err(SandboxError::syntax(format!(
                "operation descriptor has {} filter steps, at most {} are allowed",
                filters, MAX_FILTERS
            )));
        }

        let mut expr = Expr::Name(self.source.clone());
        for step in &self.steps {
            expr = lower_step(expr, step)?;
        }
        Ok(Program {
            statements: vec![expr],
        })
    }
}

fn lower_step(target: Expr, step: &Step) -> Result<Expr, SandboxError> {
    let expr = match step {
        Step::Column { name } => Expr::index(target, Expr::Str(name.clone())),
        Step::Select { columns } => Expr::index(
            target,
            Expr::List(columns.iter().cloned().map(Expr::Str).collect()),
        ),
        Step::Filter { column, cmp, value } => {
            let mask = Expr::Binary {
                op: (*cmp).into(),
                lhs: Box::new(Expr::index(target.clone(), Expr::Str(column.clone()))),
                rhs: Box::new(json_literal(value)?),
            };
            Expr::index(target, mask)
        }
        Step::Groupby { by } => Expr::method(target, "groupby", vec![positional(Expr::Str(by.clone()))]),
        Step::Aggregate { func } => Expr::method(target, func, Vec::new()),
        Step::Sort { by, ascending } => {
            let mut args = Vec::new();
            if let Some(by) = by {
                args.push(keyword(
                    "by",
                    Expr::List(by.iter().cloned().map(Expr::Str).collect()),
                ));
            }
            args.push(keyword("ascending", Expr::Bool(*ascending)));
            Expr::method(target, "sort_values", args)
        }
        Step::Head { n } => Expr::method(target, "head", vec![positional(Expr::Number(*n as f64))]),
        Step::Tail { n } => Expr::method(target, "tail", vec![positional(Expr::Number(*n as f64))]),
        Step::Plot {
            kind,
            x,
            y,
            color,
            title,
        } => {
            let args = [("kind", kind), ("x", x), ("y", y), ("color", color), ("title", title)]
                .into_iter()
                .filter_map(|(name, value)| {
                    value.as_ref().map(|v| keyword(name, Expr::Str(v.clone())))
                })
                .collect();
            Expr::method(target, "plot", args)
        }
    };
    Ok(expr)
}

fn positional(value: Expr) -> Arg {
    Arg { name: None, value }
}

fn keyword(name: &str, value: Expr) -> Arg {
    Arg {
        name: Some(name.to_string()),
        value,
    }
}

fn json_literal(value: &serde_json::Value) -> Result<Expr, SandboxError> {
    match value {
        serde_json::Value::Null => Ok(Expr::None),
        serde_json::Value::Bool(b) => Ok(Expr::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(Expr::Number)
            .ok_or_else(|| SandboxError::syntax("filter value is not a finite number")),
        serde_json::Value::String(s) => Ok(Expr::Str(s.clone())),
        other => Err(SandboxError::syntax(format!(
            "filter value must be a scalar, got {}",
            other
        ))),
    }
}
