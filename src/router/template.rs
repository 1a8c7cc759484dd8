//! ReAct prompt templates.

use crate::error::ConfigError;
use crate::router::tools::ToolRegistry;

/// Template selected by identifier, e.g. `hwchase17/react-chat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    /// Includes the conversation history.
    ReactChat,
    /// Single-shot, no history.
    React,
}

impl PromptTemplate {
    /// Resolve an identifier. Any `owner/` prefix is ignored.
    pub fn from_id(id: &str) -> Result<Self, ConfigError> {
        let name = id.trim().rsplit('/').next().unwrap_or_default();
        match name {
            "react-chat" => Ok(PromptTemplate::ReactChat),
            "react" => Ok(PromptTemplate::React),
            _ => Err(ConfigError::UnknownPromptTemplate(id.to_string())),
        }
    }

    pub fn render(&self, tools: &ToolRegistry, history: &str, input: &str, scratchpad: &str) -> String {
        let preamble = match self {
            PromptTemplate::ReactChat => CHAT_PREAMBLE,
            PromptTemplate::React => PLAIN_PREAMBLE,
        };

        let mut prompt = String::new();
        prompt.push_str(preamble);
        prompt.push_str("\n\nTOOLS:\n------\n\nYou have access to the following tools:\n\n");
        prompt.push_str(&tools.describe());
        prompt.push_str("\n\n");
        prompt.push_str(&FORMAT_INSTRUCTIONS.replace("{tool_names}", &tools.names().join(", ")));

        if *self == PromptTemplate::ReactChat {
            prompt.push_str("\n\nBegin!\n\nPrevious conversation history:\n");
            prompt.push_str(history);
            prompt.push_str("\n\nNew input: ");
        } else {
            prompt.push_str("\n\nBegin!\n\nQuestion: ");
        }
        prompt.push_str(input);
        prompt.push_str("\nThought:");
        prompt.push_str(scratchpad);
        prompt
    }
}

const CHAT_PREAMBLE: &str = "Assistant is a data assistant that answers questions about \
the loaded datasets. It can hold a conversation, remembers what was said earlier in the \
session, and delegates any computation on the data to its tools instead of guessing numbers.";

const PLAIN_PREAMBLE: &str = "Answer the following question as best you can. Delegate any \
computation on the data to the tools instead of guessing numbers.";

const FORMAT_INSTRUCTIONS: &str = "Use the following format:

Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tools::{datetime_tool, ToolRegistry};

    #[test]
    fn test_from_id_ignores_owner_prefix() {
        assert_eq!(
            PromptTemplate::from_id("hwchase17/react-chat").unwrap(),
            PromptTemplate::ReactChat
        );
        assert_eq!(PromptTemplate::from_id("react").unwrap(), PromptTemplate::React);
        assert!(matches!(
            PromptTemplate::from_id("hwchase17/openai-functions"),
            Err(ConfigError::UnknownPromptTemplate(_))
        ));
    }

    #[test]
    fn test_render_includes_tools_history_and_scratchpad() {
        let tools = ToolRegistry::new([datetime_tool()]);
        let prompt = PromptTemplate::ReactChat.render(
            &tools,
            "Human: hi\nAI: hello",
            "what day is it?",
            " I should check.",
        );

        assert!(prompt.contains("datetime_tool: Provides the current date and time."));
        assert!(prompt.contains("should be one of [datetime_tool]"));
        assert!(prompt.contains("Human: hi\nAI: hello"));
        assert!(prompt.ends_with("New input: what day is it?\nThought: I should check."));
    }

    #[test]
    fn test_plain_template_has_no_history() {
        let tools = ToolRegistry::new([datetime_tool()]);
        let prompt = PromptTemplate::React.render(&tools, "Human: secret", "q", "");
        assert!(!prompt.contains("secret"));
        assert!(prompt.ends_with("Question: q\nThought:"));
    }
}
