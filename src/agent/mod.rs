//! Sub-agents the router delegates to.
//!
//! The analysis and plotting agents turn a question into code over one
//! dataset and run it in the sandbox; the summarizer condenses text.

pub mod prompt;
pub mod sub_agent;
pub mod summarizer;

pub use sub_agent::{AgentKind, DataAgent};
pub use summarizer::Summarizer;
