//! Restricted execution of model-generated snippets.
//!
//! A snippet goes through three stages before anything runs:
//! extraction from the raw model output, an identifier allowlist check,
//! and parsing into the safe grammar. Only then is it evaluated, with the
//! supplied [`Namespace`] as the sole source of names.
//!
//! The allowlist is a best-effort filter for cooperative models, not a
//! security boundary against adversarial code.

pub mod descriptor;
pub mod eval;
pub mod lexer;
pub mod output;
pub mod parser;

pub use eval::Namespace;
pub use output::{ExecutionOutcome, Output};

use crate::error::SandboxError;
use descriptor::OperationDescriptor;
use lexer::{tokenize, Token};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// First fenced block, with an optional language tag after the fence.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[ \t]*[A-Za-z0-9_+-]*[ \t]*\r?\n)?(.*?)```").expect("valid fence pattern")
});

/// Names every snippet may use.
const BASE_NAMES: &[&str] = &[
    "df", "pd", "print", "len", "True", "False", "None", "iloc", "columns", "shape", "head",
    "tail", "groupby", "sort_values", "dropna", "mean", "sum", "min", "max", "std", "median",
    "count", "mode", "unique", "nunique", "value_counts", "round", "idxmax", "idxmin", "to_dict",
    "to_list", "tolist", "reset_index", "size", "agg", "to_numeric", "by", "ascending", "n",
    "decimals", "errors", "func", "index", "values", "name",
];

/// Extra names for the plotting agent.
const PLOT_NAMES: &[&str] = &[
    "plot", "kind", "color", "title", "x", "y", "xlabel", "ylabel", "figsize", "legend", "rot",
    "grid",
];

/// Set of identifiers a snippet may mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowlist {
    names: BTreeSet<String>,
}

impl Allowlist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Tabular analysis: indexing, filtering, grouping and aggregation.
    pub fn analysis() -> Self {
        Self::new(BASE_NAMES.iter().copied())
    }

    /// Analysis plus chart generation.
    pub fn plotting() -> Self {
        Self::new(BASE_NAMES.iter().chain(PLOT_NAMES).copied())
    }

    /// Extend the list with column names so attribute-style access works.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Pull the candidate snippet out of raw model output.
///
/// Takes the first fenced block if there is one, otherwise the whole
/// trimmed output.
pub fn extract_code_snippet(raw: &str) -> Result<String, SandboxError> {
    let snippet = match FENCED_BLOCK.captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
        None => raw,
    }
    .trim();

    if snippet.is_empty() {
        return Err(SandboxError::NoCodeFound);
    }
    Ok(snippet.to_string())
}

/// The prose around the fenced blocks of `raw`. Unfenced output is all code,
/// so there is no prose.
pub fn prose_outside_code(raw: &str) -> String {
    if !FENCED_BLOCK.is_match(raw) {
        return String::new();
    }
    FENCED_BLOCK.replace_all(raw, "").trim().to_string()
}

/// Validate `code` against `allowlist` and evaluate it in `namespace`.
pub fn execute(
    code: &str,
    allowlist: &Allowlist,
    namespace: &Namespace,
) -> Result<ExecutionOutcome, SandboxError> {
    let program = if code.trim_start().starts_with('{') {
        let program = OperationDescriptor::from_json(code.trim())?.lower()?;
        let mut names = Vec::new();
        for statement in &program.statements {
            statement.identifiers(&mut names);
        }
        if let Some(name) = names.iter().find(|n| !allowlist.contains(n)) {
            warn!("Rejected operation descriptor: '{}' is not allowed", name);
            return Err(SandboxError::DisallowedToken {
                token: name.clone(),
            });
        }
        program
    } else {
        let tokens = tokenize(code)?;
        check_tokens(&tokens, allowlist)?;
        parser::parse(&tokens)?
    };

    debug!("Executing {} statement(s)", program.statements.len());
    eval::evaluate(&program, namespace)
}

fn check_tokens(tokens: &[Token], allowlist: &Allowlist) -> Result<(), SandboxError> {
    for token in tokens {
        let rejected = match token {
            Token::Ident(name) if !allowlist.contains(name) => name.clone(),
            Token::Other(c) => c.to_string(),
            _ => continue,
        };
        warn!("Rejected snippet: disallowed token '{}'", rejected);
        return Err(SandboxError::DisallowedToken { token: rejected });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::{Column, Table, Value};

    fn namespace() -> Namespace {
        Namespace::for_table(Table::new(vec![
            Column::new(
                "sale_price",
                vec![Value::Number(100.0), Value::Number(200.0), Value::Number(300.0)],
            ),
            Column::new(
                "country",
                vec![Value::from("canada"), Value::from("france"), Value::from("canada")],
            ),
        ]))
    }

    #[test]
    fn test_extract_fenced_block_with_language_tag() {
        let raw = "Here you go:\n```python\ndf['a'].mean()\n```\nDone.";
        assert_eq!(extract_code_snippet(raw).unwrap(), "df['a'].mean()");
    }

    #[test]
    fn test_extract_unfenced_output_and_idempotence() {
        let once = extract_code_snippet("  df.head()  ").unwrap();
        assert_eq!(once, "df.head()");
        assert_eq!(extract_code_snippet(&once).unwrap(), once);
    }

    #[test]
    fn test_extract_inline_fence() {
        assert_eq!(extract_code_snippet("```df.head()```").unwrap(), "df.head()");
    }

    #[test]
    fn test_prose_outside_code() {
        let raw = "The mean is below.\n```python\ndf['a'].mean()\n```\nDone.";
        assert_eq!(prose_outside_code(raw), "The mean is below.\n\nDone.");
        assert_eq!(prose_outside_code("df['a'].mean()"), "");
    }

    #[test]
    fn test_extract_empty_is_no_code() {
        assert_eq!(extract_code_snippet("   "), Err(SandboxError::NoCodeFound));
        assert_eq!(extract_code_snippet("```\n```"), Err(SandboxError::NoCodeFound));
    }

    #[test]
    fn test_rejects_filesystem_call_alongside_allowed_tokens() {
        let code = "df['sale_price'].mean()\nos.remove('data.csv')";
        let err = execute(code, &Allowlist::analysis(), &namespace()).unwrap_err();
        assert_eq!(
            err,
            SandboxError::DisallowedToken {
                token: "os".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_import_and_dunder_access() {
        let allowlist = Allowlist::analysis();
        for code in ["import os", "df.__class__", "__import__('os')"] {
            assert!(matches!(
                execute(code, &allowlist, &namespace()),
                Err(SandboxError::DisallowedToken { .. })
            ));
        }
    }

    #[test]
    fn test_rejects_assignment_as_syntax() {
        let err = execute("df = df", &Allowlist::analysis(), &namespace()).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidSyntax { .. }));
    }

    #[test]
    fn test_executes_column_mean() {
        let outcome = execute(
            "df['sale_price'].mean()",
            &Allowlist::analysis(),
            &namespace(),
        )
        .unwrap();
        assert_eq!(outcome.last(), Some(&Output::Scalar(Value::Number(200.0))));
    }

    #[test]
    fn test_plot_requires_plotting_allowlist() {
        let code = "df.plot(kind='bar', x='country', y='sale_price')";
        assert!(matches!(
            execute(code, &Allowlist::analysis(), &namespace()),
            Err(SandboxError::DisallowedToken { .. })
        ));
        let outcome = execute(code, &Allowlist::plotting(), &namespace()).unwrap();
        assert_eq!(outcome.charts().count(), 1);
    }

    #[test]
    fn test_descriptor_snippet() {
        let code = r#"{"steps": [{"op": "filter", "column": "country", "cmp": "eq", "value": "canada"},
                                 {"op": "column", "name": "sale_price"},
                                 {"op": "aggregate", "func": "sum"}]}"#;
        let outcome = execute(code, &Allowlist::analysis(), &namespace()).unwrap();
        assert_eq!(outcome.last(), Some(&Output::Scalar(Value::Number(400.0))));
    }

    #[test]
    fn test_descriptor_aggregate_checked_against_allowlist() {
        let code = r#"{"steps": [{"op": "aggregate", "func": "eval"}]}"#;
        assert_eq!(
            execute(code, &Allowlist::analysis(), &namespace()).unwrap_err(),
            SandboxError::DisallowedToken {
                token: "eval".to_string()
            }
        );
    }

    #[test]
    fn test_deeply_nested_snippet_is_an_error() {
        let code = format!("{}df{}", "(".repeat(3_000), ")".repeat(3_000));
        assert_eq!(
            execute(&code, &Allowlist::analysis(), &namespace()).unwrap_err(),
            SandboxError::syntax("expression nested too deeply")
        );

        let steps = vec![r#"{"op": "sort"}"#; 3_000].join(",");
        let descriptor = format!(r#"{{"steps": [{}]}}"#, steps);
        assert!(matches!(
            execute(&descriptor, &Allowlist::analysis(), &namespace()),
            Err(SandboxError::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn test_unknown_column_is_execution_error() {
        let err = execute("df['price'].sum()", &Allowlist::analysis(), &namespace()).unwrap_err();
        assert!(matches!(err, SandboxError::Execution { .. }));
    }

    #[test]
    fn test_attribute_column_access_with_extended_allowlist() {
        let allowlist = Allowlist::analysis().with_names(["sale_price"]);
        let outcome = execute("df.sale_price.max()", &allowlist, &namespace()).unwrap();
        assert_eq!(outcome.last(), Some(&Output::Scalar(Value::Number(300.0))));
    }
}
