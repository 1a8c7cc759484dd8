//! Router/orchestrator: conversation memory, the tool registry and the
//! bounded ReAct loop that picks tools until it reaches a final answer.

pub mod agent_loop;
pub mod memory;
pub mod parser;
pub mod template;
pub mod tools;

pub use agent_loop::{Router, RouterConfig, TurnOutcome};
pub use template::PromptTemplate;
pub use tools::ToolRegistry;
