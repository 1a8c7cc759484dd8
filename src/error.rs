//! Error types shared across components.
//!
//! Each component reports failures through its own enum so callers can tell
//! a configuration problem from a data problem or a rejected snippet. The
//! application edge (`main`, config loading) wraps these with `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Startup-time configuration failures. These abort the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API key is missing. Ensure '{var}' is set in your environment.")]
    MissingCredential { var: String },

    #[error("no dataset configured: set DATASET_PATH, pass --dataset, or add a [datasets] table")]
    MissingDatasetPath,

    #[error("unknown prompt template '{0}' (expected 'react-chat' or 'react')")]
    UnknownPromptTemplate(String),

    #[error("active dataset '{0}' is not among the configured datasets")]
    UnknownActiveDataset(String),
}

/// Failures while loading, reading or updating datasets.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("dataset file not found at {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("unsupported file extension '{extension}' for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("failed to decode {}: {reason}", path.display())]
    DecodeError { path: PathBuf, reason: String },

    #[error("data for key '{key}' not loaded")]
    NotLoaded { key: String },

    #[error("missing required columns: {}", columns.join(", "))]
    MissingColumns { columns: Vec<String> },
}

/// Failures of the code sandbox, one variant per stage.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SandboxError {
    #[error("no code snippet found in the agent response")]
    NoCodeFound,

    #[error("disallowed token '{token}' in code snippet")]
    DisallowedToken { token: String },

    #[error("invalid code snippet: {message}")]
    InvalidSyntax { message: String },

    #[error("execution failed: {message}")]
    Execution { message: String },
}

impl SandboxError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::InvalidSyntax {
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }
}

impl From<DataError> for SandboxError {
    fn from(err: DataError) -> Self {
        Self::execution(err.to_string())
    }
}

/// Failures talking to the inference service.
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    #[error("API key is missing. Ensure '{var}' is set in your environment.")]
    MissingCredential { var: String },

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("cannot connect to inference service at {url}")]
    Connect { url: String },

    #[error("inference API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to send request: {0}")]
    Request(String),

    #[error("inference service returned no content")]
    EmptyResponse,
}

/// Failures of a sub-agent's `process` call.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Failures that end a router turn without an answer.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("router model call failed: {0}")]
    Llm(#[from] LlmError),
}
