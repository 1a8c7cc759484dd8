//! Prompt construction for the data sub-agents and the summarizer.

use crate::agent::sub_agent::AgentKind;
use crate::data::Table;
use crate::sandbox::{Allowlist, Output};

/// Rows shown in the dataset preview.
const PREVIEW_ROWS: usize = 3;

/// Instruction prefixed to every summary request.
pub const SUMMARY_INSTRUCTION: &str =
    "Summarize the following content in a concise and clear manner:";

/// Build the prompt a sub-agent sends for `query` against `table`.
pub fn agent_prompt(
    kind: AgentKind,
    dataset_key: &str,
    table: &Table,
    allowlist: &Allowlist,
    query: &str,
) -> String {
    let preview_rows: Vec<usize> = (0..table.n_rows().min(PREVIEW_ROWS)).collect();
    let preview = Output::Frame(table.take_rows(&preview_rows));
    let names: Vec<&str> = allowlist.names().collect();

    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are working with a DataFrame named `df` loaded from dataset '{}'. {}\n\n",
        dataset_key,
        kind.capability()
    ));
    prompt.push_str(&format!(
        "Columns are: {}.\n\n",
        table.column_names().join(", ")
    ));
    prompt.push_str(&format!("First rows:\n{}\n\n", preview));
    prompt.push_str(
        "Use proper syntax to access and manipulate data. Answer with ONE fenced code block \
         containing expressions over `df` (one per line, no assignments, no imports). \
         Strings are quoted, column names are used exactly as listed.\n",
    );
    prompt.push_str(&format!("Only these names may appear: {}.\n", names.join(", ")));
    if kind == AgentKind::Plotting {
        prompt.push_str(
            "Produce charts with `.plot(kind=..., x=..., y=..., title=...)` on a table or series.\n",
        );
    }
    prompt.push_str(
        "Instead of code you may answer with a JSON pipeline such as \
         {\"steps\": [{\"op\": \"groupby\", \"by\": \"<column>\"}, {\"op\": \"column\", \"name\": \"<column>\"}, \
         {\"op\": \"aggregate\", \"func\": \"mean\"}]}.\n\n",
    );
    prompt.push_str(&format!("Question: {}\n", query));
    prompt
}

pub fn summary_prompt(text: &str) -> String {
    format!("{}\n\n{}", SUMMARY_INSTRUCTION, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::{Column, Value};

    #[test]
    fn test_agent_prompt_lists_columns_and_names() {
        let table = Table::new(vec![
            Column::new("sale_price", vec![Value::Number(1.0); 5]),
            Column::new("country", vec![Value::from("canada"); 5]),
        ]);
        let prompt = agent_prompt(
            AgentKind::Analysis,
            "financials",
            &table,
            &Allowlist::analysis(),
            "average sale price by country",
        );

        assert!(prompt.contains("Columns are: sale_price, country."));
        assert!(prompt.contains("groupby"));
        assert!(prompt.contains("[3 rows x 2 columns]"));
        assert!(prompt.ends_with("Question: average sale price by country\n"));
        assert!(!prompt.contains(".plot("));
    }

    #[test]
    fn test_summary_prompt() {
        assert_eq!(
            summary_prompt("abc"),
            "Summarize the following content in a concise and clear manner:\n\nabc"
        );
    }
}
