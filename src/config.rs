//! Configuration file handling.
//!
//! This module handles loading `.datapilot.toml`, merging it with CLI
//! arguments and environment variables, and resolving the credentials each
//! model client needs.

use crate::cli::Args;
use crate::error::ConfigError;
use crate::llm::ClientConfig;
use crate::router::{PromptTemplate, RouterConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".datapilot.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Dataset key → file path.
    #[serde(default)]
    pub datasets: BTreeMap<String, PathBuf>,

    /// Model settings shared by the router and agents.
    #[serde(default)]
    pub model: ModelConfig,

    /// Router settings.
    #[serde(default)]
    pub router: RouterSettings,

    /// Per-agent overrides.
    #[serde(default)]
    pub agents: AgentsConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Input that clears memory and ends the session.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,

    /// Dataset used when a query does not name one.
    #[serde(default)]
    pub active_dataset: Option<String>,

    /// Coerce numeric-like text columns after loading.
    #[serde(default = "default_true")]
    pub preprocess: bool,

    /// Where the plotting agent writes chart JSON.
    #[serde(default)]
    pub chart_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            stop_command: default_stop_command(),
            active_dataset: None,
            preprocess: true,
            chart_dir: None,
        }
    }
}

fn default_stop_command() -> String {
    "stop agent".to_string()
}

fn default_true() -> bool {
    true
}

/// Inference model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier.
    #[serde(default = "default_model")]
    pub name: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Temperature for generation.
    #[serde(default)]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Environment variable holding the router's API key.
    #[serde(default = "default_router_key_env")]
    pub api_key_env: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            base_url: default_base_url(),
            temperature: 0.0,
            timeout_seconds: default_timeout(),
            api_key_env: default_router_key_env(),
        }
    }
}

fn default_model() -> String {
    "typhoon-v1.5x-70b-instruct".to_string()
}

fn default_base_url() -> String {
    "https://api.opentyphoon.ai/v1".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_router_key_env() -> String {
    "TYPHOON_API_KEY".to_string()
}

/// Router loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Template id, e.g. `hwchase17/react-chat`.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_seconds: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            prompt_template: default_prompt_template(),
            tool_timeout_seconds: default_tool_timeout(),
        }
    }
}

fn default_max_iterations() -> usize {
    20
}

fn default_prompt_template() -> String {
    "hwchase17/react-chat".to_string()
}

fn default_tool_timeout() -> u64 {
    180
}

/// Overrides for one agent's model client. Unset fields fall back to `[model]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentOverride {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Environment variable holding this agent's API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub analysis: AgentOverride,
    #[serde(default)]
    pub plotting: AgentOverride,
    #[serde(default)]
    pub summary: AgentOverride,
}

/// Which client a [`ClientConfig`] is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Router,
    Analysis,
    Plotting,
    Summary,
}

impl ModelRole {
    /// Credential variable used when the config names none.
    pub fn default_key_env(&self) -> &'static str {
        match self {
            ModelRole::Router => "TYPHOON_API_KEY",
            ModelRole::Analysis => "PANDAS_API_KEY",
            ModelRole::Plotting | ModelRole::Summary => "PLOT_API_KEY",
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments (and the environment variables clap reads for them)
    /// take precedence over config file settings. Only values that were
    /// actually provided override.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.base_url {
            self.model.base_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }

        if let Some(max_iterations) = args.max_iterations {
            self.router.max_iterations = max_iterations;
        }
        if let Some(ref prompt) = args.prompt {
            self.router.prompt_template = prompt.clone();
        }
        if let Some(tool_timeout) = args.tool_timeout {
            self.router.tool_timeout_seconds = tool_timeout;
        }

        for path in &args.datasets {
            self.datasets.insert(dataset_key(path), path.clone());
        }
        if let Some(ref key) = args.active_dataset {
            self.general.active_dataset = Some(key.clone());
        }
        if let Some(ref dir) = args.chart_dir {
            self.general.chart_dir = Some(dir.clone());
        }

        if args.preprocess {
            self.general.preprocess = true;
        } else if args.no_preprocess {
            self.general.preprocess = false;
        }
    }

    /// Check settings that cannot be expressed by types alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datasets.is_empty() {
            return Err(ConfigError::MissingDatasetPath);
        }
        if let Some(ref key) = self.general.active_dataset {
            if !self.datasets.contains_key(key) {
                return Err(ConfigError::UnknownActiveDataset(key.clone()));
            }
        }
        PromptTemplate::from_id(&self.router.prompt_template)?;
        Ok(())
    }

    /// The dataset agents use by default: the configured one, else the
    /// first key in order.
    pub fn active_dataset(&self) -> Option<String> {
        self.general
            .active_dataset
            .clone()
            .or_else(|| self.datasets.keys().next().cloned())
    }

    pub fn router_config(&self) -> Result<RouterConfig, ConfigError> {
        Ok(RouterConfig {
            max_iterations: self.router.max_iterations,
            tool_timeout: Duration::from_secs(self.router.tool_timeout_seconds),
            template: PromptTemplate::from_id(&self.router.prompt_template)?,
            stop_command: self.general.stop_command.clone(),
        })
    }

    /// Resolve the client settings for `role`, reading credentials through
    /// `env`. An agent whose own variable is unset falls back to the
    /// router's key; if neither is set this is a `MissingCredential`.
    pub fn client_config<F>(&self, role: ModelRole, env: F) -> Result<ClientConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = match role {
            ModelRole::Router => AgentOverride::default(),
            ModelRole::Analysis => self.agents.analysis.clone(),
            ModelRole::Plotting => self.agents.plotting.clone(),
            ModelRole::Summary => self.agents.summary.clone(),
        };

        let key_env = match role {
            ModelRole::Router => self.model.api_key_env.clone(),
            _ => overrides
                .api_key_env
                .clone()
                .unwrap_or_else(|| role.default_key_env().to_string()),
        };
        let lookup = |var: &str| env(var).filter(|v| !v.trim().is_empty());
        let api_key = lookup(&key_env)
            .or_else(|| lookup(&self.model.api_key_env))
            .ok_or_else(|| ConfigError::MissingCredential {
                var: key_env.clone(),
            })?;

        Ok(ClientConfig {
            base_url: overrides
                .base_url
                .unwrap_or_else(|| self.model.base_url.clone()),
            model_name: overrides.model.unwrap_or_else(|| self.model.name.clone()),
            temperature: overrides.temperature.unwrap_or(self.model.temperature),
            timeout_seconds: self.model.timeout_seconds,
            api_key_var: key_env,
            api_key: Some(api_key),
            system_prompt: None,
        })
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config
            .datasets
            .insert("financials".to_string(), PathBuf::from("./Financials.csv"));
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// Store key for a dataset file: its lower-cased file stem.
pub fn dataset_key(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().trim().to_lowercase().replace(' ', "_"))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_with(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, "typhoon-v1.5x-70b-instruct");
        assert_eq!(config.model.base_url, "https://api.opentyphoon.ai/v1");
        assert_eq!(config.model.temperature, 0.0);
        assert_eq!(config.router.max_iterations, 20);
        assert_eq!(config.general.stop_command, "stop agent");
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
active_dataset = "reviews"
preprocess = false

[datasets]
financials = "./Financials.csv"
reviews = "./McDonald_s_Reviews.csv"

[model]
name = "typhoon-v2-8b"
temperature = 0.2

[router]
max_iterations = 8
prompt_template = "react"

[agents.plotting]
model = "typhoon-v2-70b"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.active_dataset.as_deref(), Some("reviews"));
        assert!(!config.general.preprocess);
        assert_eq!(config.datasets.len(), 2);
        assert_eq!(config.model.name, "typhoon-v2-8b");
        assert_eq!(config.model.temperature, 0.2);
        assert_eq!(config.router.max_iterations, 8);
        assert_eq!(config.router.tool_timeout_seconds, 180);
        assert_eq!(config.agents.plotting.model.as_deref(), Some("typhoon-v2-70b"));
        assert!(config.validate().is_ok());
        assert_eq!(
            config.router_config().unwrap().template,
            PromptTemplate::React
        );
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[datasets]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[router]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_dataset() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::MissingDatasetPath)
        ));
    }

    #[test]
    fn test_validate_unknown_active_dataset() {
        let mut config = Config::default();
        config.datasets.insert("a".into(), PathBuf::from("a.csv"));
        config.general.active_dataset = Some("b".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownActiveDataset(key)) if key == "b"
        ));
    }

    #[test]
    fn test_validate_unknown_template() {
        let mut config = Config::default();
        config.datasets.insert("a".into(), PathBuf::from("a.csv"));
        config.router.prompt_template = "owner/structured-chat".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownPromptTemplate(_))
        ));
    }

    #[test]
    fn test_agent_key_falls_back_to_router_key() {
        let config = Config::default();
        let env = env_with(&[("TYPHOON_API_KEY", "router-key"), ("PLOT_API_KEY", "plot-key")]);

        let analysis = config.client_config(ModelRole::Analysis, &env).unwrap();
        assert_eq!(analysis.api_key.as_deref(), Some("router-key"));
        assert_eq!(analysis.api_key_var, "PANDAS_API_KEY");

        let summary = config.client_config(ModelRole::Summary, &env).unwrap();
        assert_eq!(summary.api_key.as_deref(), Some("plot-key"));
    }

    #[test]
    fn test_missing_credential_names_variable() {
        let config = Config::default();
        let err = config
            .client_config(ModelRole::Plotting, env_with(&[("PLOT_API_KEY", " ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { var } if var == "PLOT_API_KEY"));
    }

    #[test]
    fn test_agent_override_applies() {
        let mut config = Config::default();
        config.agents.plotting.model = Some("vision".into());
        config.agents.plotting.temperature = Some(0.7);
        let client = config
            .client_config(ModelRole::Plotting, env_with(&[("TYPHOON_API_KEY", "k")]))
            .unwrap();
        assert_eq!(client.model_name, "vision");
        assert_eq!(client.temperature, 0.7);
        assert_eq!(client.base_url, config.model.base_url);
    }

    #[test]
    fn test_dataset_key_from_path() {
        assert_eq!(dataset_key(Path::new("./data/Financials.csv")), "financials");
        assert_eq!(
            dataset_key(Path::new("McDonald s Reviews.xlsx")),
            "mcdonald_s_reviews"
        );
    }
}
