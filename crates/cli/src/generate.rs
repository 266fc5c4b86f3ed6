// Pipeline definitions drafted by a model from a plain-language description

use anyhow::{bail, Context, Result};
use pipewright_core::llm::{extract_json, truncate, LlmClient};
use pipewright_core::pipeline::Pipeline;
use pipewright_core::tools::ToolRegistry;
use pipewright_core::{EngineOptions, PipelineDefinition};
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Shown to the model as the shape every definition follows
const TEMPLATE_PIPELINE: &str = include_str!("../../../pipelines/story.json");

/// Keys without which a reply is not worth validating
pub const REQUIRED_KEYS: [&str; 4] = ["pipeline_name", "agents", "routing", "start_agent"];

pub struct PipelineGenerator {
    llm: Arc<dyn LlmClient>,
    model: String,
    registry: Arc<ToolRegistry>,
    options: EngineOptions,
}

impl PipelineGenerator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        registry: Arc<ToolRegistry>,
        options: EngineOptions,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            registry,
            options,
        }
    }

    fn prompt(&self, description: &str) -> String {
        format!(
            "You are an assistant that writes data processing pipeline definitions in JSON.\
             \nConvert the user's description into one JSON object with exactly the structure of this example:\
             \n\n{template}\
             \n\nFormatting rules:\
             \n- Respond with the JSON object only. No introduction, explanation or markdown fences.\
             \n- Quote every key and every string value with double quotes.\
             \n- No trailing commas after the last element of an object or array.\
             \n- Escape special characters inside strings, e.g. a newline in a regex pattern is \"\\\\n\".\
             \n\nField guidance:\
             \n- pipeline_name: a descriptive name such as \"Customer-Inquiry-Processing\".\
             \n- initial_input: optional; include it when the description implies input data.\
             \n- start_agent: the id of the first agent; it must exist in agents.\
             \n- agents[].id: unique snake_case ids such as \"parse_data\".\
             \n- agents[].type: \"llm_agent\" or \"tool_agent\".\
             \n- llm_agent: needs \"model\" (use \"{model}\" unless told otherwise) and a \"prompt_template\" \
             whose {{placeholders}} are names from its inputs; \"output_format\" may be \"text\", \"list\" or \"json\".\
             \n- tool_agent: needs \"tool_name\" (one of: {tools}) and a \"tool_config\" object.\
             \n- inputs: \"pipeline.initial_input\" or \"<agent_id>.<output_name>\" of an earlier agent.\
             \n- outputs: a list of output names.\
             \n- routing: every agent id is a key; \"next\" is the following agent id or null.\
             \n- final_outputs: optional map of result name to \"<agent_id>.<output_name>\".\
             \n\nUser's pipeline description:\n\"{description}\"\
             \n\nGenerate ONLY the JSON object.",
            template = TEMPLATE_PIPELINE.trim(),
            model = self.model,
            tools = self.registry.names().join(", "),
            description = description,
        )
    }

    /// Ask the model for a definition and accept it only if it builds
    pub async fn generate(&self, description: &str) -> Result<Value> {
        let description = description.trim();
        if description.is_empty() {
            bail!("Pipeline description is empty");
        }

        let reply = self
            .llm
            .invoke(&self.model, &self.prompt(description))
            .await
            .context("Failed to generate pipeline")?;

        let definition = parse_reply(&reply)?;
        self.check(&definition)?;
        tracing::info!(
            "Generated pipeline '{}'",
            definition["pipeline_name"].as_str().unwrap_or_default()
        );
        Ok(definition)
    }

    fn check(&self, definition: &Value) -> Result<()> {
        let parsed: PipelineDefinition = serde_json::from_value(definition.clone())
            .context("Generated JSON is not a pipeline definition")?;
        Pipeline::build(parsed, self.registry.clone(), self.options.clone())
            .context("Generated pipeline failed validation")?;
        Ok(())
    }
}

/// The body of a reply wrapped in a ```json fence, or the trimmed reply
fn strip_fence(reply: &str) -> &str {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").ok());

    let trimmed = reply.trim();
    fence
        .as_ref()
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed)
}

/// Parse a model reply into a definition object carrying every required key
pub fn parse_reply(reply: &str) -> Result<Value> {
    let body = strip_fence(reply);
    let parsed = serde_json::from_str::<Value>(body)
        .ok()
        .or_else(|| extract_json(body))
        .with_context(|| format!("Model reply is not JSON: '{}'", truncate(reply, 200)))?;

    let Value::Object(fields) = &parsed else {
        bail!("Generated JSON is not an object");
    };
    for key in REQUIRED_KEYS {
        if !fields.contains_key(key) {
            bail!("Generated JSON is incomplete. Essential field '{}' is missing.", key);
        }
    }
    Ok(parsed)
}

/// `Customer-Inquiry-Processing` and `CustomerInquiryProcessing` both give
/// `customer_inquiry_processing`
pub fn file_stem(pipeline_name: &str) -> String {
    let mut stem = String::new();
    let mut prev: Option<char> = None;

    for ch in pipeline_name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            let word_break = ch.is_ascii_uppercase()
                && prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit());
            if word_break && !stem.ends_with('_') {
                stem.push('_');
            }
            stem.push(ch.to_ascii_lowercase());
        } else if !stem.is_empty() && !stem.ends_with('_') {
            stem.push('_');
        }
        prev = Some(ch);
    }

    let stem = stem.trim_end_matches('_');
    if stem.is_empty() {
        "pipeline".to_string()
    } else {
        stem.to_string()
    }
}

/// Write the definition as `<dir>/<file_stem>.json`
pub fn save(definition: &Value, dir: &Path, overwrite: bool) -> Result<PathBuf> {
    let name = definition
        .get("pipeline_name")
        .and_then(Value::as_str)
        .context("Generated pipeline has no name")?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory {}", dir.display()))?;

    let path = dir.join(format!("{}.json", file_stem(name)));
    if path.exists() && !overwrite {
        bail!("{} already exists (pass --force to replace it)", path.display());
    }

    let content = serde_json::to_string_pretty(definition)?;
    std::fs::write(&path, content + "\n")
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::info!("Saved pipeline to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_core::llm::LlmError;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a fixed text and records `(model, prompt)` per call
    struct ScriptedLlm {
        reply: String,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedLlm {
        fn new(reply: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for ScriptedLlm {
        async fn invoke(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), prompt.to_string()));
            Ok(self.reply.clone())
        }
    }

    fn generator(llm: Arc<ScriptedLlm>) -> PipelineGenerator {
        PipelineGenerator::new(
            llm,
            "phi4:latest",
            Arc::new(pipewright_tools::builtin_registry()),
            EngineOptions::default(),
        )
    }

    fn inquiry_pipeline() -> Value {
        json!({
            "pipeline_name": "Customer-Inquiry-Processing",
            "initial_input": "Where is my order?",
            "start_agent": "answer_inquiry",
            "agents": [{
                "id": "answer_inquiry",
                "type": "llm_agent",
                "model": "phi4:latest",
                "prompt_template": "Answer politely: {question}",
                "inputs": {"question": "pipeline.initial_input"},
                "outputs": ["answer"]
            }],
            "routing": {"answer_inquiry": {"next": null}},
            "final_outputs": {"answer": "answer_inquiry.answer"}
        })
    }

    #[tokio::test]
    async fn test_generate_from_fenced_reply() {
        let reply = format!("```json\n{}\n```", serde_json::to_string_pretty(&inquiry_pipeline()).unwrap());
        let llm = ScriptedLlm::new(reply);

        let definition = generator(llm.clone())
            .generate("  answer customer questions about orders ")
            .await
            .unwrap();
        assert_eq!(definition, inquiry_pipeline());

        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "phi4:latest");
        assert!(calls[0].1.contains("\"answer customer questions about orders\""));
        assert!(calls[0].1.contains("\"pipeline_name\": \"story-pipeline\""));
        assert!(calls[0].1.contains("StructuredDataParserTool"));
        assert!(calls[0].1.contains("LoopController"));
    }

    #[tokio::test]
    async fn test_generate_from_reply_with_prose() {
        let reply = format!("Here is your pipeline:\n{}\nEnjoy!", inquiry_pipeline());
        let definition = generator(ScriptedLlm::new(reply))
            .generate("answer questions")
            .await
            .unwrap();
        assert_eq!(definition["start_agent"], json!("answer_inquiry"));
    }

    #[tokio::test]
    async fn test_missing_required_key_rejected() {
        let mut incomplete = inquiry_pipeline();
        incomplete.as_object_mut().unwrap().remove("routing");

        let err = generator(ScriptedLlm::new(incomplete.to_string()))
            .generate("answer questions")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Generated JSON is incomplete. Essential field 'routing' is missing."
        );
    }

    #[tokio::test]
    async fn test_invalid_pipeline_rejected() {
        let mut broken = inquiry_pipeline();
        broken["start_agent"] = json!("ghost");

        let err = generator(ScriptedLlm::new(broken.to_string()))
            .generate("answer questions")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Generated pipeline failed validation");
    }

    #[tokio::test]
    async fn test_non_json_reply_rejected() {
        let err = generator(ScriptedLlm::new("I can't help with that."))
            .generate("answer questions")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Model reply is not JSON"));
    }

    #[tokio::test]
    async fn test_empty_description_skips_model() {
        let llm = ScriptedLlm::new("{}");
        assert!(generator(llm.clone()).generate("   ").await.is_err());
        assert!(llm.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_reply_requires_object() {
        let err = parse_reply("[1, 2]").unwrap_err();
        assert_eq!(err.to_string(), "Generated JSON is not an object");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("Customer-Inquiry-Processing"), "customer_inquiry_processing");
        assert_eq!(file_stem("CustomerInquiryProcessing"), "customer_inquiry_processing");
        assert_eq!(file_stem("AI Content v2!"), "ai_content_v2");
        assert_eq!(file_stem("story_pipeline"), "story_pipeline");
        assert_eq!(file_stem("???"), "pipeline");
    }

    #[test]
    fn test_save_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("pipelines");

        let path = save(&inquiry_pipeline(), &out_dir, false).unwrap();
        assert_eq!(path, out_dir.join("customer_inquiry_processing.json"));

        let loaded = PipelineDefinition::from_path(&path).unwrap();
        assert_eq!(loaded.pipeline_name, "Customer-Inquiry-Processing");

        assert!(save(&inquiry_pipeline(), &out_dir, false).is_err());
        assert!(save(&inquiry_pipeline(), &out_dir, true).is_ok());
    }
}
