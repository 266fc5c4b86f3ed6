//! Language model contract and output post-processing.

use crate::types::OutputFormat;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM response parse error: {0}")]
    Parse(String),
}

/// Transport used to invoke a model with a prompt
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, model: &str, prompt: &str) -> Result<String, LlmError>;
}

impl OutputFormat {
    /// Turn raw model text into the value bound to the agent's output
    pub fn apply(self, raw: String) -> Result<Value, LlmError> {
        match self {
            OutputFormat::Text => Ok(Value::String(raw)),
            OutputFormat::List => Ok(Value::Array(
                parse_list_output(&raw).into_iter().map(Value::String).collect(),
            )),
            OutputFormat::Json => extract_json(&raw).ok_or_else(|| {
                LlmError::Parse(format!("no JSON value in response: {}", truncate(&raw, 200)))
            }),
        }
    }
}

/// Split numbered, bulleted, or newline-separated model output into items
pub fn parse_list_output(text: &str) -> Vec<String> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let marker = MARKER.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").expect("list marker pattern is valid")
    });

    text.lines()
        .map(|line| marker.replace(line, "").trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parse the reply as JSON, falling back to the outermost `{...}` or `[...]` span
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    [('{', '}'), ('[', ']')].iter().find_map(|&(open, close)| {
        let start = trimmed.find(open)?;
        let end = trimmed.rfind(close)?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&trimmed[start..=end]).ok()
    })
}

/// First `max_chars` characters, with `...` appended when anything was cut
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
