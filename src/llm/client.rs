use crate::config::LlmConfig;
use crate::errors::{AgentError, AgentResult};
use crate::llm::types::ChatMessage;

/// Minimal client for an OpenAI-compatible chat-completions endpoint.
/// Non-streaming: the planner needs one JSON reply per step.
pub struct OpenAiChatClient {
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(cfg: &LlmConfig) -> Self {
        Self {
            api_base: cfg.api_base.clone(),
            api_key: cfg.resolve_api_key(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            client: reqwest::Client::new(),
        }
    }

    /// Run one chat completion and return the assistant's text content.
    pub async fn chat(&self, messages: &[ChatMessage]) -> AgentResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "temperature": self.temperature,
        });

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "sending LLM request"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::LlmProvider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(AgentError::LlmProvider(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::LlmProvider(e.to_string()))?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        tracing::debug!(content_len = content.len(), "LLM response received");
        Ok(content)
    }
}
