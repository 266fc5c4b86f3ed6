// LLM-backed extraction of structured fields from a free-form request

use pipewright_core::template::value_to_text;
use pipewright_core::NEXT_STEP_KEY;
use pipewright_core::tools::{
    require_input, Tool, ToolContext, ToolError, ToolFactory, ToolInputs, ToolOutputs,
};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;

pub const STRUCTURED_DATA_PARSER_TOOL: &str = "StructuredDataParserTool";

pub const NOT_FOUND: &str = "Not found";
pub const PARSE_FAILED: &str = "Error: Failed to parse";

const REQUEST_INPUT: &str = "natural_language_request";

fn default_instructions() -> String {
    "Extract the requested fields.".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructuredDataParserConfig {
    pub model: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
}

/// Asks the model for a JSON object keyed by the step's declared outputs
#[derive(Debug)]
pub struct StructuredDataParserTool {
    config: StructuredDataParserConfig,
}

impl StructuredDataParserTool {
    pub fn from_config(config: &Value) -> Result<Self, ToolError> {
        let config: StructuredDataParserConfig = serde_json::from_value(config.clone())
            .map_err(|e| ToolError::InvalidConfig(format!("structured data parser config: {}", e)))?;
        if config.model.trim().is_empty() {
            return Err(ToolError::InvalidConfig(
                "structured data parser requires a model".to_string(),
            ));
        }
        Ok(Self { config })
    }

    fn prompt(&self, request: &str, fields: &[String]) -> String {
        format!(
            "You are an expert data extraction tool. Your sole purpose is to extract \
             structured data from a user's request and respond ONLY with a valid JSON object.\
             \n\nExtraction Instructions: {}\
             \nDesired JSON keys: {}\
             \n\nUser Request: \"{}\"\
             \n\nJSON Output:",
            self.config.instructions,
            fields.join(", "),
            request
        )
    }
}

/// The span from the first `{` to the last `}`, or the whole reply
fn object_span(reply: &str) -> &str {
    static OBJECT: OnceLock<Option<Regex>> = OnceLock::new();
    let object = OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").ok());

    object
        .as_ref()
        .and_then(|re| re.find(reply))
        .map(|m| m.as_str())
        .unwrap_or(reply)
}

/// Declared fields the model is asked for; routing overrides are never extracted
fn extracted_fields(fields: &[String]) -> impl Iterator<Item = &String> {
    fields.iter().filter(|field| field.as_str() != NEXT_STEP_KEY)
}

/// Bind each declared field from the reply, filling gaps with placeholders.
/// Keys the step did not declare are dropped.
fn fields_from_reply(reply: &str, fields: &[String]) -> Option<ToolOutputs> {
    let Ok(Value::Object(parsed)) = serde_json::from_str::<Value>(object_span(reply)) else {
        return None;
    };

    Some(
        extracted_fields(fields)
            .map(|field| {
                let value = parsed.get(field).cloned().unwrap_or_else(|| json!(NOT_FOUND));
                (field.clone(), value)
            })
            .collect(),
    )
}

#[async_trait::async_trait]
impl Tool for StructuredDataParserTool {
    async fn execute(
        &mut self,
        inputs: &ToolInputs,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutputs, ToolError> {
        let request = value_to_text(require_input(inputs, REQUEST_INPUT)?);
        if request.is_empty() {
            return Err(ToolError::MissingInput(REQUEST_INPUT.to_string()));
        }

        let fields: Vec<String> = extracted_fields(ctx.declared_outputs).cloned().collect();
        let prompt = self.prompt(&request, &fields);
        let reply = ctx.llm.invoke(&self.config.model, &prompt).await?;

        match fields_from_reply(&reply, ctx.declared_outputs) {
            Some(outputs) => Ok(outputs),
            None => {
                tracing::warn!(
                    "Step {}: could not parse model reply as a JSON object: {}",
                    ctx.step_id,
                    reply
                );
                Ok(extracted_fields(ctx.declared_outputs)
                    .map(|field| (field.clone(), json!(PARSE_FAILED)))
                    .collect())
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct StructuredDataParserFactory;

impl ToolFactory for StructuredDataParserFactory {
    fn name(&self) -> &str {
        STRUCTURED_DATA_PARSER_TOOL
    }

    fn create(&self, config: &Value) -> Result<Box<dyn Tool>, ToolError> {
        Ok(Box::new(StructuredDataParserTool::from_config(config)?))
    }
}
