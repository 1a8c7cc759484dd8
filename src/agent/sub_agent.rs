//! Data sub-agents: query in, sandboxed code and its result out.

use crate::agent::prompt;
use crate::data::DatasetStore;
use crate::error::AgentError;
use crate::llm::LanguageModel;
use crate::sandbox::{self, output::render_chart, Allowlist, ExecutionOutcome, Namespace};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which capability a sub-agent exposes. The variants differ only in
/// allowlist and described capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Analysis,
    Plotting,
}

impl AgentKind {
    /// Name the router knows the agent by.
    pub fn tool_name(&self) -> &'static str {
        match self {
            AgentKind::Analysis => "pandas_agent",
            AgentKind::Plotting => "plotting_agent",
        }
    }

    pub fn tool_description(&self) -> &'static str {
        match self {
            AgentKind::Analysis => {
                "Useful when you need to analyze data in a DataFrame: filtering, grouping, \
                 aggregating and looking up values. Input is a question about the data; \
                 prefix it with @<dataset> to pick a dataset."
            }
            AgentKind::Plotting => {
                "Useful when you need to plot a graph or chart of the data. Input is a \
                 description of the chart; prefix it with @<dataset> to pick a dataset."
            }
        }
    }

    pub fn capability(&self) -> &'static str {
        match self {
            AgentKind::Analysis => "Your job is tabular analysis: indexing, filtering, grouping and aggregation.",
            AgentKind::Plotting => "Your job is chart generation: select and aggregate the data, then plot it.",
        }
    }

    pub fn allowlist(&self) -> Allowlist {
        match self {
            AgentKind::Analysis => Allowlist::analysis(),
            AgentKind::Plotting => Allowlist::plotting(),
        }
    }
}

/// What a successful `process` call produced.
#[derive(Debug, Clone)]
pub struct AgentReply {
    /// The model's raw output.
    pub response: String,
    pub code: String,
    pub outcome: ExecutionOutcome,
    /// Chart files written for this reply.
    pub chart_files: Vec<PathBuf>,
}

impl AgentReply {
    /// The model's explanation, without the code it wrote.
    pub fn explanation(&self) -> String {
        sandbox::prose_outside_code(&self.response)
    }

    /// Text fed back to the router as an observation.
    pub fn observation(&self) -> String {
        let mut text = String::new();
        let explanation = self.explanation();
        if !explanation.is_empty() {
            text.push_str(&format!("Answer:\n{}\n\n", explanation));
        }
        text.push_str(&format!("Result:\n{}\n\nCode:\n{}", self.outcome, self.code));
        for path in &self.chart_files {
            text.push_str(&format!("\nChart saved to {}", path.display()));
        }
        text
    }
}

/// A sub-agent bound to one inference collaborator and the shared store.
pub struct DataAgent {
    kind: AgentKind,
    llm: Arc<dyn LanguageModel>,
    store: DatasetStore,
    dataset_key: String,
    chart_dir: Option<PathBuf>,
}

impl DataAgent {
    pub fn new(
        kind: AgentKind,
        llm: Arc<dyn LanguageModel>,
        store: DatasetStore,
        dataset_key: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            llm,
            store,
            dataset_key: dataset_key.into(),
            chart_dir: None,
        }
    }

    /// Write chart specifications produced by plots into `dir`.
    pub fn with_chart_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.chart_dir = dir;
        self
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Answer `query` by prompting for code and running it in the sandbox.
    pub async fn process(&self, query: &str) -> Result<AgentReply, AgentError> {
        let (dataset_key, query) = self.resolve_dataset(query);
        let table = self.store.get(dataset_key)?;
        let allowlist = self
            .kind
            .allowlist()
            .with_names(table.column_names().into_iter().filter(|c| is_identifier(c)));

        let prompt = prompt::agent_prompt(self.kind, dataset_key, &table, &allowlist, query);
        debug!("{} prompt for '{}': {} chars", self.kind.tool_name(), dataset_key, prompt.len());

        let response = self.llm.complete(&prompt).await?;
        let code = sandbox::extract_code_snippet(&response)?;
        info!("Executing code:\n{}", code);

        let outcome = sandbox::execute(&code, &allowlist, &Namespace::for_table(table))?;
        let chart_files = match &self.chart_dir {
            Some(dir) if self.kind == AgentKind::Plotting => write_charts(dir, &outcome),
            _ => Vec::new(),
        };

        Ok(AgentReply {
            response,
            code,
            outcome,
            chart_files,
        })
    }

    /// `@key rest` selects a loaded dataset other than the default.
    fn resolve_dataset<'q>(&'q self, query: &'q str) -> (&'q str, &'q str) {
        let trimmed = query.trim();
        if let Some(rest) = trimmed.strip_prefix('@') {
            let (key, remainder) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if self.store.contains(key) {
                return (key, remainder.trim());
            }
            warn!("Unknown dataset '{}', using '{}'", key, self.dataset_key);
        }
        (&self.dataset_key, trimmed)
    }
}

/// Column names usable as `df.<name>`. Names starting with `_` stay out.
fn is_identifier(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_alphabetic)
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Persist every chart as `chart-<timestamp>.json`. Failures are logged and
/// the chart stays in the text result.
fn write_charts(dir: &Path, outcome: &ExecutionOutcome) -> Vec<PathBuf> {
    let charts: Vec<_> = outcome.charts().collect();
    if charts.is_empty() {
        return Vec::new();
    }
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Cannot create chart directory {}: {}", dir.display(), e);
        return Vec::new();
    }

    let stamp = Local::now().format("%Y%m%d-%H%M%S%3f");
    let mut written = Vec::new();
    for (i, chart) in charts.iter().enumerate() {
        let file_name = if charts.len() == 1 {
            format!("chart-{}.json", stamp)
        } else {
            format!("chart-{}-{}.json", stamp, i + 1)
        };
        let path = dir.join(file_name);
        let result = serde_json::to_string_pretty(chart)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(&path, json).map_err(|e| e.to_string()));
        match result {
            Ok(()) => {
                debug!("Chart written:\n{}", render_chart(chart));
                info!("Chart saved to {}", path.display());
                written.push(path);
            }
            Err(e) => warn!("Failed to write chart {}: {}", path.display(), e),
        }
    }
    written
}
