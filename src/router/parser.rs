//! Parsing of ReAct-formatted model output.
//!
//! ```text
//! Thought: I need the averages.
//! Action: pandas_agent
//! Action Input: average sale price by country
//! ```
//!
//! or
//!
//! ```text
//! Thought: I now know the final answer.
//! Final Answer: Canada leads with 30.
//! ```

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)")
        .expect("valid action pattern")
});

static ACTION_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Action\s*\d*\s*:").expect("valid action-only pattern"));

const FINAL_ANSWER: &str = "Final Answer:";

/// One decision of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactStep {
    Action { tool: String, input: String },
    Final(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactParseError {
    #[error("Invalid Format: Missing 'Action Input:' after 'Action:'")]
    MissingActionInput,

    #[error("Invalid Format: output contains both a final answer and an action")]
    ActionAndFinalAnswer,

    #[error("Invalid Format: could not parse model output: `{0}`")]
    Unparsable(String),
}

/// Drop anything the model wrote after inventing its own observation.
pub fn truncate_at_observation(text: &str) -> &str {
    match text.find("\nObservation") {
        Some(pos) => &text[..pos],
        None => text,
    }
}

pub fn parse_react_output(text: &str) -> Result<ReactStep, ReactParseError> {
    let text = truncate_at_observation(text);
    let final_pos = text.find(FINAL_ANSWER);

    if let Some(caps) = ACTION.captures(text) {
        if final_pos.is_some() {
            return Err(ReactParseError::ActionAndFinalAnswer);
        }
        let tool = caps[1].trim().trim_matches('`').trim().to_string();
        let input = caps[2]
            .trim()
            .trim_matches('"')
            .trim()
            .to_string();
        if tool.is_empty() {
            return Err(ReactParseError::Unparsable(text.trim().to_string()));
        }
        return Ok(ReactStep::Action { tool, input });
    }

    if let Some(pos) = final_pos {
        let answer = text[pos + FINAL_ANSWER.len()..].trim().to_string();
        return Ok(ReactStep::Final(answer));
    }

    if ACTION_ONLY.is_match(text) {
        return Err(ReactParseError::MissingActionInput);
    }
    Err(ReactParseError::Unparsable(text.trim().to_string()))
}
