//! Tools the router can invoke.
//!
//! A tool is a name, a description shown to the model, and an async
//! function from the model's `Action Input` to a [`ToolResult`]. The
//! registry is fixed when the router is built.

use crate::agent::{DataAgent, Summarizer};
use crate::data::DatasetStore;
use chrono::Local;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message),
        }
    }

    /// Text appended to the scratchpad after `Observation:`.
    pub fn into_observation(self) -> String {
        if self.success {
            self.output
        } else {
            format!("Error: {}", self.error.unwrap_or_default())
        }
    }
}

type InvokeFn = Arc<dyn Fn(String) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// A named, described, invokable capability.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    invoke: InvokeFn,
}

impl ToolDescriptor {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            invoke: Arc::new(move |input| f(input).boxed()),
        }
    }

    pub fn invoke(&self, input: String) -> BoxFuture<'static, ToolResult> {
        debug!("Executing tool: {} with input: {:?}", self.name, input);
        (self.invoke)(input)
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Immutable set of tools, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// Build the registry. A later tool with an already-used name is dropped.
    pub fn new(tools: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        let mut registered: Vec<ToolDescriptor> = Vec::new();
        for tool in tools {
            if registered.iter().any(|t| t.name == tool.name) {
                warn!("Duplicate tool '{}' ignored", tool.name);
                continue;
            }
            registered.push(tool);
        }
        Self { tools: registered }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// `name: description` lines for the prompt.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("{}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Expose a data sub-agent as a tool named after its kind.
pub fn agent_tool(agent: Arc<DataAgent>) -> ToolDescriptor {
    let kind = agent.kind();
    ToolDescriptor::new(kind.tool_name(), kind.tool_description(), move |input: String| {
        let agent = Arc::clone(&agent);
        async move {
            match agent.process(&input).await {
                Ok(reply) => ToolResult::success(reply.observation()),
                Err(e) => {
                    warn!("{} failed: {}", agent.kind().tool_name(), e);
                    ToolResult::error(e.to_string())
                }
            }
        }
    })
}

pub fn summary_tool(summarizer: Arc<Summarizer>) -> ToolDescriptor {
    ToolDescriptor::new(
        "summary_agent",
        "Useful when you need to summarize responses from other agents or condense user \
         input for clear and concise communication. Input is the text to summarize.",
        move |input: String| {
            let summarizer = Arc::clone(&summarizer);
            async move { ToolResult::success(summarizer.summarize(&input).await) }
        },
    )
}

pub fn datetime_tool() -> ToolDescriptor {
    ToolDescriptor::new(
        "datetime_tool",
        "Provides the current date and time. Input is ignored.",
        |_input: String| async {
            ToolResult::success(Local::now().format("%A, %d %B %Y %H:%M:%S (%:z)").to_string())
        },
    )
}

pub fn list_datasets_tool(store: DatasetStore) -> ToolDescriptor {
    ToolDescriptor::new(
        "list_datasets",
        "Lists the loaded datasets with their row counts and column names. Input is ignored.",
        move |_input: String| {
            let store = store.clone();
            async move {
                let infos = store.describe();
                if infos.is_empty() {
                    return ToolResult::error("no datasets are loaded".to_string());
                }
                let lines: Vec<String> = infos
                    .iter()
                    .map(|info| {
                        format!(
                            "{}: {} rows, columns: {}",
                            info.key,
                            info.rows,
                            info.columns.join(", ")
                        )
                    })
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::{Column, Table, Value};

    fn echo(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(name, "Echoes its input.", |input: String| async move {
            ToolResult::success(input)
        })
    }

    #[test]
    fn test_tool_result_observation() {
        assert_eq!(ToolResult::success("ok".into()).into_observation(), "ok");
        assert_eq!(
            ToolResult::error("boom".into()).into_observation(),
            "Error: boom"
        );
    }

    #[test]
    fn test_registry_keeps_first_of_duplicate_names() {
        let registry = ToolRegistry::new([echo("a"), echo("b"), echo("a")]);
        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.describe(), "a: Echoes its input.\nb: Echoes its input.");
    }

    #[tokio::test]
    async fn test_invoke_echo() {
        let registry = ToolRegistry::new([echo("echo")]);
        let result = registry.get("echo").unwrap().invoke("hi".into()).await;
        assert!(result.success);
        assert_eq!(result.output, "hi");
    }

    #[tokio::test]
    async fn test_list_datasets_tool() {
        let store = DatasetStore::new();
        let tool = list_datasets_tool(store.clone());
        assert!(!tool.invoke(String::new()).await.success);

        store.insert(
            "financials",
            Table::new(vec![Column::new("units", vec![Value::Number(1.0)])]),
        );
        let result = tool.invoke(String::new()).await;
        assert_eq!(result.output, "financials: 1 rows, columns: units");
    }

    #[tokio::test]
    async fn test_datetime_tool_reports_year() {
        let result = datetime_tool().invoke(String::new()).await;
        assert!(result.output.contains(&Local::now().format("%Y").to_string()));
    }
}
