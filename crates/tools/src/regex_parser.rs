// Regex extraction of named fields from text

use pipewright_core::template::value_to_text;
use pipewright_core::tools::{
    require_input, Tool, ToolContext, ToolError, ToolFactory, ToolInputs, ToolOutputs,
};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const REGEX_PARSER_TOOL: &str = "RegexParserTool";

/// Value bound to a field whose pattern did not match
pub const NOT_FOUND: &str = "Not found";

const TEXT_INPUT: &str = "text_to_parse";
const BODY_OUTPUT: &str = "body";

#[derive(Debug, Default, Deserialize)]
struct RegexParserConfig {
    /// Output name to pattern
    #[serde(default)]
    patterns: BTreeMap<String, String>,
    #[serde(default)]
    body_pattern: Option<BodyPatternConfig>,
}

#[derive(Debug, Deserialize)]
struct BodyPatternConfig {
    pattern: String,
    #[serde(default)]
    flags: Vec<String>,
}

/// Extracts one value per configured pattern from `text_to_parse`
#[derive(Debug)]
pub struct RegexParserTool {
    patterns: Vec<(String, Regex)>,
    body: Option<Regex>,
}

impl RegexParserTool {
    pub fn from_config(config: &Value) -> Result<Self, ToolError> {
        let config: RegexParserConfig = serde_json::from_value(config.clone())
            .map_err(|e| ToolError::InvalidConfig(format!("regex parser config: {}", e)))?;

        let patterns = config
            .patterns
            .into_iter()
            .map(|(name, pattern)| {
                let regex = Regex::new(&pattern).map_err(|e| {
                    ToolError::InvalidConfig(format!("pattern for '{}': {}", name, e))
                })?;
                Ok((name, regex))
            })
            .collect::<Result<Vec<_>, ToolError>>()?;

        let body = config.body_pattern.map(|b| build_body_regex(&b)).transpose()?;

        Ok(Self { patterns, body })
    }
}

fn build_body_regex(config: &BodyPatternConfig) -> Result<Regex, ToolError> {
    let mut builder = RegexBuilder::new(&config.pattern);
    for flag in &config.flags {
        match flag.to_ascii_uppercase().as_str() {
            "DOTALL" | "S" => builder.dot_matches_new_line(true),
            "MULTILINE" | "M" => builder.multi_line(true),
            "IGNORECASE" | "I" => builder.case_insensitive(true),
            other => {
                return Err(ToolError::InvalidConfig(format!(
                    "unsupported body_pattern flag '{}'",
                    other
                )))
            }
        };
    }

    builder
        .build()
        .map_err(|e| ToolError::InvalidConfig(format!("body_pattern: {}", e)))
}

/// First capture group, or the whole match for group-less patterns, trimmed
fn first_capture(regex: &Regex, text: &str) -> Option<String> {
    let caps = regex.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().trim().to_string())
}

#[async_trait::async_trait]
impl Tool for RegexParserTool {
    async fn execute(
        &mut self,
        inputs: &ToolInputs,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutputs, ToolError> {
        let text = value_to_text(require_input(inputs, TEXT_INPUT)?);
        if text.is_empty() {
            return Err(ToolError::MissingInput(TEXT_INPUT.to_string()));
        }

        let mut outputs = ToolOutputs::new();
        for (name, regex) in &self.patterns {
            let value = first_capture(regex, &text).unwrap_or_else(|| NOT_FOUND.to_string());
            outputs.insert(name.clone(), json!(value));
        }

        if let Some(body) = &self.body {
            let value = first_capture(body, &text).unwrap_or_default();
            outputs.insert(BODY_OUTPUT.to_string(), json!(value));
        }

        tracing::debug!(
            "Regex parser {} extracted {} fields",
            ctx.step_id,
            outputs.len()
        );
        Ok(outputs)
    }
}

#[derive(Debug, Default)]
pub struct RegexParserFactory;

impl ToolFactory for RegexParserFactory {
    fn name(&self) -> &str {
        REGEX_PARSER_TOOL
    }

    fn create(&self, config: &Value) -> Result<Box<dyn Tool>, ToolError> {
        Ok(Box::new(RegexParserTool::from_config(config)?))
    }
}
