//! OpenAI-compatible chat-completions client.

use crate::error::LlmError;
use crate::llm::{ChatMessage, LanguageModel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for one model endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Name of the environment variable the key came from.
    pub api_key_var: String,
    pub api_key: Option<String>,
    /// Optional system message sent before every prompt.
    pub system_prompt: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.opentyphoon.ai/v1".to_string(),
            model_name: "typhoon-v1.5x-70b-instruct".to_string(),
            temperature: 0.0,
            timeout_seconds: 120,
            api_key_var: "TYPHOON_API_KEY".to_string(),
            api_key: None,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client for a chat-completions endpoint.
pub struct ChatClient {
    config: ClientConfig,
    http_client: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Request(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// The configured key, or `MissingCredential` before any request is made.
    fn api_key(&self) -> Result<&str, LlmError> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| LlmError::MissingCredential {
                var: self.config.api_key_var.clone(),
            })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn send(&self, prompt: &str, stop: &[String]) -> Result<String, LlmError> {
        let api_key = self.api_key()?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        let request = CompletionRequest {
            model: &self.config.model_name,
            temperature: self.config.temperature,
            messages,
            stop: (!stop.is_empty()).then_some(stop),
        };

        debug!(
            "Sending completion request to {} ({} chars)",
            self.config.model_name,
            prompt.len()
        );

        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        seconds: self.config.timeout_seconds,
                    }
                } else if e.is_connect() {
                    LlmError::Connect {
                        url: self.config.base_url.clone(),
                    }
                } else {
                    LlmError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Request(format!("failed to parse response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.send(prompt, &[]).await
    }

    async fn complete_with_stop(&self, prompt: &str, stop: &[String]) -> Result<String, LlmError> {
        self.send(prompt, stop).await
    }

    fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.model_name, "typhoon-v1.5x-70b-instruct");
        assert_eq!(config.temperature, 0.0);
        assert!(config.api_key.is_none());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_request() {
        let client = ChatClient::new(ClientConfig {
            // Unroutable: a request attempt would surface as Connect, not MissingCredential.
            base_url: "http://127.0.0.1:9".to_string(),
            api_key_var: "PANDAS_API_KEY".to_string(),
            api_key: Some("   ".to_string()),
            ..ClientConfig::default()
        })
        .unwrap();

        let err = client.complete("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::MissingCredential { var } if var == "PANDAS_API_KEY"));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = ChatClient::new(ClientConfig {
            base_url: "https://example.test/v1/".to_string(),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(client.endpoint(), "https://example.test/v1/chat/completions");
    }

    #[test]
    fn test_request_omits_empty_stop() {
        let request = CompletionRequest {
            model: "m",
            temperature: 0.0,
            messages: vec![ChatMessage::user("hi")],
            stop: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("stop").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
