use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Reserved output key a step uses to override the static routing table.
pub const NEXT_STEP_KEY: &str = "_next_step_id";

/// State key holding the pipeline's initial input.
pub const INITIAL_INPUT_KEY: &str = "pipeline.initial_input";

/// Agent type for language model steps.
pub const LLM_AGENT_TYPE: &str = "llm_agent";

/// Agent type for tool steps that name their tool in `tool_name`.
pub const TOOL_AGENT_TYPE: &str = "tool_agent";

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a pipeline step (agent)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declarative pipeline: the agents, how control flows between them, and
/// which results are surfaced when the run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(alias = "name")]
    pub pipeline_name: String,
    #[serde(default)]
    pub initial_input: Value,
    pub start_agent: StepId,
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub routing: BTreeMap<StepId, RouteEntry>,
    #[serde(default)]
    pub final_outputs: BTreeMap<String, String>,
}

impl PipelineDefinition {
    /// Parse a definition from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse pipeline definition")
    }

    /// Load a definition from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline definition {}", path.display()))?;
        Self::from_json_str(&content)
    }

    /// Find an agent by id
    pub fn agent(&self, id: &StepId) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| &a.id == id)
    }
}

/// Specification for a single agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: StepId,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Local input name to a state path or a literal value
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub outputs: Vec<String>,

    // LLM agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<OutputFormat>,

    // Tool agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<Value>,
}

impl AgentSpec {
    /// Tool configuration, or an empty object when none was given
    pub fn tool_config_or_empty(&self) -> Value {
        self.tool_config
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

/// Post-processing applied to raw LLM text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    #[serde(alias = "raw", alias = "string")]
    Text,
    #[serde(alias = "structured")]
    Json,
    List,
}

/// Static routing entry; `next: null` (or an empty id) ends the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    #[serde(default)]
    pub next: Option<StepId>,
}

/// Where a routing decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Static,
    Override,
}

/// One executed step in a run's trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: StepId,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outputs: Vec<String>,
    pub next: Option<StepId>,
    pub routed_by: RouteSource,
}

/// Limits and defaults the engine applies to every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Maximum number of step executions before a run is declared runaway
    pub max_steps: usize,
    /// Model used by LLM agents that do not name one
    pub default_model: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            default_model: None,
        }
    }
}
