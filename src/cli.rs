//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Model and router settings are optional here so
//! that values from `.datapilot.toml` survive unless a flag or environment
//! variable overrides them.

use clap::Parser;
use std::path::PathBuf;

/// DataPilot - ask questions about tabular data in plain language
///
/// A router model picks between an analysis agent, a plotting agent and a
/// summarizer. Agents answer with code that runs in a restricted sandbox
/// against the loaded datasets.
///
/// Examples:
///   datapilot --dataset ./Financials.csv
///   datapilot --dataset ./Financials.csv --query "average sale price by country"
///   datapilot --dataset ./sales.xlsx --chart-dir ./charts
///   datapilot --dataset ./Financials.csv --dry-run
///   datapilot --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Dataset files to load (CSV or spreadsheet, comma-separated)
    ///
    /// Each file is stored under its lower-cased file stem, e.g.
    /// ./Financials.csv becomes "financials".
    #[arg(
        short,
        long = "dataset",
        value_name = "FILE",
        env = "DATASET_PATH",
        value_delimiter = ','
    )]
    pub datasets: Vec<PathBuf>,

    /// Dataset the agents use when a query does not name one
    #[arg(long, value_name = "KEY")]
    pub active_dataset: Option<String>,

    /// Model used by the router and, unless overridden, the agents
    #[arg(short, long, env = "TYPHOON_MODEL")]
    pub model: Option<String>,

    /// Base URL of the OpenAI-compatible inference API
    #[arg(long, value_name = "URL", env = "TYPHOON_BASE_URL")]
    pub base_url: Option<String>,

    /// Temperature for model responses (0.0 - 2.0)
    #[arg(long, env = "TEMPERATURE")]
    pub temperature: Option<f32>,

    /// Maximum think/act cycles per turn
    #[arg(long, value_name = "COUNT", env = "MAX_ITERATIONS")]
    pub max_iterations: Option<usize>,

    /// Router prompt template (react-chat or react, owner/ prefix allowed)
    #[arg(long, value_name = "ID", env = "REACT_PROMPT")]
    pub prompt: Option<String>,

    /// Model request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Per-tool timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub tool_timeout: Option<u64>,

    /// Directory for chart JSON files written by the plotting agent
    #[arg(long, value_name = "DIR")]
    pub chart_dir: Option<PathBuf>,

    /// Coerce currency/number-like text columns to numbers after loading
    #[arg(long, conflicts_with = "no_preprocess")]
    pub preprocess: bool,

    /// Keep text columns as loaded
    #[arg(long, conflicts_with = "preprocess")]
    pub no_preprocess: bool,

    /// Answer a single query and exit instead of starting the prompt loop
    #[arg(long, value_name = "TEXT")]
    pub query: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .datapilot.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: load datasets, print their schema, and exit without model calls
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .datapilot.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Base URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if self.max_iterations == Some(0) {
            return Err("Max iterations must be at least 1".to_string());
        }

        if self.timeout == Some(0) || self.tool_timeout == Some(0) {
            return Err("Timeouts must be at least 1 second".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref query) = self.query {
            if query.trim().is_empty() {
                return Err("--query must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
