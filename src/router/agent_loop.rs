//! The router's think-act-observe loop.
//!
//! Each turn is an explicit state machine:
//!
//! ```text
//! Thinking ──action──▶ AwaitingToolResult ──observation──▶ Thinking
//!    │ final answer                                         │ stop signal
//!    ▼                                                      ▼
//! FinalAnswer                                            Stopped
//! ```
//!
//! Unparsable model output is fed back as an observation and retried; the
//! iteration counter bounds the loop either way.

use crate::error::RouterError;
use crate::llm::LanguageModel;
use crate::router::memory::ConversationMemory;
use crate::router::parser::{parse_react_output, truncate_at_observation, ReactStep};
use crate::router::template::PromptTemplate;
use crate::router::tools::ToolRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Message returned when the iteration cap is reached.
pub const ITERATION_LIMIT_MESSAGE: &str = "Agent stopped due to iteration limit.";

/// Configuration for the router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_iterations: usize,
    pub tool_timeout: Duration,
    pub template: PromptTemplate,
    /// Reserved input that clears memory and ends the session.
    pub stop_command: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tool_timeout: Duration::from_secs(180),
            template: PromptTemplate::ReactChat,
            stop_command: "stop agent".to_string(),
        }
    }
}

/// Where a turn currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterState {
    Thinking,
    AwaitingToolResult {
        tool: String,
        input: String,
        /// The model output that requested the call.
        log: String,
    },
    FinalAnswer(String),
    Stopped,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answer(String),
    MaxIterationsExceeded { iterations: usize, partial: String },
    Stopped,
}

/// Cooperative cancellation flag, checked between loop iterations.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Router {
    llm: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    memory: ConversationMemory,
    config: RouterConfig,
    stop: StopHandle,
}

impl Router {
    pub fn new(llm: Arc<dyn LanguageModel>, tools: ToolRegistry, config: RouterConfig) -> Self {
        info!(
            "Initializing router with model {} and tools: {}",
            llm.model_name(),
            tools.names().join(", ")
        );
        Self {
            llm,
            tools,
            memory: ConversationMemory::new(),
            config,
            stop: StopHandle::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn is_stop_command(&self, input: &str) -> bool {
        input.trim().eq_ignore_ascii_case(self.config.stop_command.trim())
    }

    /// End the session: clear memory and raise the stop flag.
    pub fn stop(&mut self) -> TurnOutcome {
        self.memory.clear();
        self.stop.stop();
        info!("Router stopped, memory cleared");
        TurnOutcome::Stopped
    }

    /// Run one user turn to completion.
    ///
    /// Model failures end the turn with an error; tool failures and
    /// timeouts become observations.
    pub async fn run_turn(&mut self, input: &str) -> Result<TurnOutcome, RouterError> {
        if self.is_stop_command(input) {
            return Ok(self.stop());
        }

        let stop_sequences = vec!["\nObservation:".to_string()];
        let mut scratchpad = String::new();
        let mut last_observation: Option<String> = None;
        let mut iterations = 0;
        let mut state = RouterState::Thinking;

        loop {
            state = match state {
                RouterState::Thinking if self.stop.is_stopped() => RouterState::Stopped,
                RouterState::Thinking if iterations >= self.config.max_iterations => {
                    warn!("Iteration limit of {} reached", self.config.max_iterations);
                    let partial = match &last_observation {
                        Some(obs) => format!("{} Last observation: {}", ITERATION_LIMIT_MESSAGE, obs),
                        None => ITERATION_LIMIT_MESSAGE.to_string(),
                    };
                    self.memory.record_exchange(input, &partial);
                    return Ok(TurnOutcome::MaxIterationsExceeded {
                        iterations,
                        partial,
                    });
                }
                RouterState::Thinking => {
                    iterations += 1;
                    debug!("Router iteration {}", iterations);

                    let prompt = self.config.template.render(
                        &self.tools,
                        &self.memory.render(),
                        input,
                        &scratchpad,
                    );
                    let output = self.llm.complete_with_stop(&prompt, &stop_sequences).await?;
                    let trimmed = truncate_at_observation(&output).trim();
                    let log = trimmed
                        .strip_prefix("Thought:")
                        .unwrap_or(trimmed)
                        .trim()
                        .to_string();

                    match parse_react_output(&output) {
                        Ok(ReactStep::Final(answer)) => RouterState::FinalAnswer(answer),
                        Ok(ReactStep::Action {
                            tool,
                            input: action_input,
                        }) => RouterState::AwaitingToolResult {
                            tool,
                            input: action_input,
                            log,
                        },
                        Err(e) => {
                            warn!("Could not parse model output (iteration {}): {}", iterations, e);
                            scratchpad.push_str(&format!(" {}\nObservation: {}\nThought:", log, e));
                            RouterState::Thinking
                        }
                    }
                }
                RouterState::AwaitingToolResult { tool, input: tool_input, log } => {
                    let observation = self.call_tool(&tool, &tool_input).await;
                    scratchpad.push_str(&format!(" {}\nObservation: {}\nThought:", log, observation));
                    last_observation = Some(observation);
                    RouterState::Thinking
                }
                RouterState::FinalAnswer(answer) => {
                    self.memory.record_exchange(input, &answer);
                    return Ok(TurnOutcome::Answer(answer));
                }
                RouterState::Stopped => {
                    self.memory.clear();
                    info!("Turn stopped after {} iteration(s)", iterations);
                    return Ok(TurnOutcome::Stopped);
                }
            };
        }
    }

    async fn call_tool(&self, name: &str, input: &str) -> String {
        let Some(tool) = self.tools.get(name) else {
            warn!("Model requested unknown tool '{}'", name);
            return format!(
                "{} is not a valid tool, try one of [{}].",
                name,
                self.tools.names().join(", ")
            );
        };

        info!("Calling tool {} with input: {}", name, input);
        match tokio::time::timeout(self.config.tool_timeout, tool.invoke(input.to_string())).await {
            Ok(result) => result.into_observation(),
            Err(_) => {
                warn!("Tool {} timed out", name);
                format!(
                    "ToolTimeout: {} did not finish within {}s",
                    name,
                    self.config.tool_timeout.as_secs_f64()
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, DataAgent};
    use crate::data::DatasetStore;
    use crate::error::LlmError;
    use crate::llm::testing::ScriptedModel;
    use crate::router::tools::{agent_tool, ToolDescriptor, ToolResult};
    use std::io::Write;

    fn echo_tools() -> ToolRegistry {
        ToolRegistry::new([ToolDescriptor::new(
            "echo",
            "Echoes its input.",
            |input: String| async move { ToolResult::success(format!("echo:{}", input)) },
        )])
    }

    fn router(llm: Arc<ScriptedModel>, tools: ToolRegistry, max_iterations: usize) -> Router {
        Router::new(
            llm,
            tools,
            RouterConfig {
                max_iterations,
                ..RouterConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_final_answer_is_recorded_in_memory() {
        let llm = Arc::new(ScriptedModel::new(["Thought: easy\nFinal Answer: hello"]));
        let mut router = router(llm, echo_tools(), 20);

        let outcome = router.run_turn("hi").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Answer("hello".into()));
        assert_eq!(router.memory().render(), "Human: hi\nAI: hello");
    }

    #[tokio::test]
    async fn test_loop_terminates_at_iteration_cap() {
        let llm = Arc::new(ScriptedModel::new([
            "Thought: again\nAction: echo\nAction Input: ping",
        ]));
        let mut router = router(llm.clone(), echo_tools(), 3);

        let outcome = router.run_turn("loop forever").await.unwrap();
        match outcome {
            TurnOutcome::MaxIterationsExceeded { iterations, partial } => {
                assert_eq!(iterations, 3);
                assert!(partial.starts_with(ITERATION_LIMIT_MESSAGE));
                assert!(partial.contains("echo:ping"));
            }
            other => panic!("expected iteration cap, got {:?}", other),
        }
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_parse_error_is_fed_back_and_retried() {
        let llm = Arc::new(ScriptedModel::new([
            "I think the answer is 4",
            "Thought: fix format\nFinal Answer: 4",
        ]));
        let mut router = router(llm.clone(), echo_tools(), 20);

        let outcome = router.run_turn("2+2?").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Answer("4".into()));
        let prompts = llm.prompts();
        assert!(prompts[1].contains("Observation: Invalid Format"));
    }

    #[tokio::test]
    async fn test_tool_observation_reaches_next_prompt() {
        let llm = Arc::new(ScriptedModel::new([
            "Thought: use echo\nAction: echo\nAction Input: abc",
            "Thought: done\nFinal Answer: abc",
        ]));
        let mut router = router(llm.clone(), echo_tools(), 20);

        router.run_turn("repeat abc").await.unwrap();
        assert!(llm.prompts()[1].contains("Action Input: abc\nObservation: echo:abc\nThought:"));
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_valid_tools() {
        let llm = Arc::new(ScriptedModel::new([
            "Action: shell\nAction Input: ls",
            "Final Answer: sorry",
        ]));
        let mut router = router(llm.clone(), echo_tools(), 20);

        router.run_turn("list files").await.unwrap();
        assert!(llm.prompts()[1].contains("shell is not a valid tool, try one of [echo]."));
    }

    #[tokio::test]
    async fn test_tool_timeout_becomes_observation() {
        let tools = ToolRegistry::new([ToolDescriptor::new(
            "slow",
            "Never finishes in time.",
            |_input: String| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                ToolResult::success("late".into())
            },
        )]);
        let llm = Arc::new(ScriptedModel::new([
            "Action: slow\nAction Input: x",
            "Final Answer: gave up",
        ]));
        let mut router = Router::new(
            llm.clone(),
            tools,
            RouterConfig {
                tool_timeout: Duration::from_millis(50),
                ..RouterConfig::default()
            },
        );

        let outcome = router.run_turn("go").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Answer("gave up".into()));
        assert!(llm.prompts()[1].contains("ToolTimeout: slow"));
    }

    #[tokio::test]
    async fn test_stop_command_clears_memory() {
        let llm = Arc::new(ScriptedModel::new(["Final Answer: ok"]));
        let mut router = router(llm.clone(), echo_tools(), 20);
        router.run_turn("hello").await.unwrap();
        assert!(!router.memory().is_empty());

        let outcome = router.run_turn("  STOP AGENT ").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Stopped);
        assert!(router.memory().is_empty());
        assert!(router.stop_handle().is_stopped());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_stop_signal_checked_before_model_call() {
        let llm = Arc::new(ScriptedModel::new(["Final Answer: never"]));
        let mut router = router(llm.clone(), echo_tools(), 20);
        router.stop_handle().stop();

        assert_eq!(router.run_turn("hi").await.unwrap(), TurnOutcome::Stopped);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_ends_turn_with_error() {
        let llm = Arc::new(ScriptedModel::with_results([Err(LlmError::Connect {
            url: "http://localhost".into(),
        })]));
        let mut router = router(llm, echo_tools(), 20);

        assert!(matches!(
            router.run_turn("hi").await,
            Err(RouterError::Llm(LlmError::Connect { .. }))
        ));
        assert!(router.memory().is_empty());
    }

    #[tokio::test]
    async fn test_average_sale_price_by_country_end_to_end() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Sale Price,Country").unwrap();
        writeln!(file, "100,Canada").unwrap();
        writeln!(file, "300,Canada").unwrap();
        writeln!(file, "50,France").unwrap();
        file.flush().unwrap();

        let store = DatasetStore::new();
        store.load("financials", file.path()).unwrap();

        let analysis_llm = Arc::new(ScriptedModel::new([
            "```python\ndf.groupby('country')['sale_price'].mean()\n```",
        ]));
        let agent = DataAgent::new(AgentKind::Analysis, analysis_llm, store, "financials");

        let router_llm = Arc::new(ScriptedModel::new([
            "Thought: Do I need to use a tool? Yes\nAction: pandas_agent\nAction Input: average sale price by country",
            "Thought: I now know the final answer\nFinal Answer: Canada 200, France 50",
        ]));
        let mut router = router(
            router_llm.clone(),
            ToolRegistry::new([agent_tool(Arc::new(agent))]),
            20,
        );

        let outcome = router.run_turn("average sale price by country").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Answer("Canada 200, France 50".into()));

        let observation_prompt = &router_llm.prompts()[1];
        assert!(observation_prompt.contains("Canada    200"));
        assert!(observation_prompt.contains("France    50"));
        assert!(observation_prompt.contains("Name: sale_price"));
    }
}
