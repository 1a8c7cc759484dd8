//! Scripted language model for tests.

use crate::error::LlmError;
use crate::llm::LanguageModel;
use async_trait::async_trait;
use std::sync::Mutex;

/// Replays canned replies in order, repeating the last one once the script
/// runs out, and records every prompt it receives.
pub struct ScriptedModel {
    replies: Mutex<Vec<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        let mut replies: Vec<_> = results.into_iter().collect();
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut replies = self.replies.lock().unwrap();
        match replies.len() {
            0 => Err(LlmError::EmptyResponse),
            1 => replies[0].clone(),
            _ => replies.pop().unwrap_or(Err(LlmError::EmptyResponse)),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
