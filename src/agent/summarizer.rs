//! Stateless summarization on the inference collaborator.

use crate::agent::prompt::summary_prompt;
use crate::llm::LanguageModel;
use std::sync::Arc;
use tracing::error;

/// Returned in place of a summary when the model call fails.
pub const SUMMARY_FAILURE: &str = "An error occurred while generating the summary.";

pub struct Summarizer {
    llm: Arc<dyn LanguageModel>,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// One model call; the reply is returned verbatim.
    pub async fn summarize(&self, text: &str) -> String {
        match self.llm.complete(&summary_prompt(text)).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Error during summarization: {}", e);
                SUMMARY_FAILURE.to_string()
            }
        }
    }
}
