// Ollama chat transport for LLM agents

use crate::config::LlmSettings;
use anyhow::{Context, Result};
use pipewright_core::llm::{truncate, LlmClient, LlmError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

pub struct OllamaClient {
    client: Client,
    chat_url: String,
    temperature: f64,
}

impl OllamaClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            chat_url: format!("{}/api/chat", settings.base_url.trim_end_matches('/')),
            temperature: settings.temperature,
        })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    fn request<'a>(&self, model: &'a str, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for OllamaClient {
    async fn invoke(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        tracing::debug!("Calling model {} ({} prompt chars)", model, prompt.len());

        let response = self
            .client
            .post(&self.chat_url)
            .json(&self.request(model, prompt))
            .send()
            .await
            .map_err(|e| LlmError::Request(format!("ollama request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate(&body, 320),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("invalid ollama response: {}", e)))?;

        Ok(body.message.content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(base_url: &str) -> LlmSettings {
        LlmSettings {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_chat_url_normalized() {
        let client = OllamaClient::new(&settings("http://localhost:11434/")).unwrap();
        assert_eq!(client.chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_request_body_shape() {
        let client = OllamaClient::new(&settings("http://localhost:11434")).unwrap();
        let body = serde_json::to_value(client.request("phi4:latest", "Hello")).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "phi4:latest",
                "messages": [{"role": "user", "content": "Hello"}],
                "stream": false,
                "options": {"temperature": 0.0}
            })
        );
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"model":"phi4","message":{"role":"assistant","content":"  hi there \n"},"done":true}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.content.trim(), "hi there");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_error() {
        let client = OllamaClient::new(&LlmSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();

        let err = client.invoke("m", "p").await.unwrap_err();
        assert!(matches!(err, LlmError::Request(_)));
    }
}
