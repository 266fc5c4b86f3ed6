// Tool contracts: factories build per-run tool instances from `tool_config`

mod registry;

pub use registry::ToolRegistry;

use crate::llm::{LlmClient, LlmError};
use crate::types::{AgentSpec, StepId};
use serde_json::{Map, Value};

/// Resolved inputs handed to a tool, keyed by local input name
pub type ToolInputs = Map<String, Value>;

/// Outputs returned by a tool, keyed by output name
pub type ToolOutputs = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The tool's configuration is unusable
    #[error("invalid tool config: {0}")]
    InvalidConfig(String),

    #[error("missing required input '{0}'")]
    MissingInput(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Failed(String),
}

/// Per-execution context available to a tool
pub struct ToolContext<'a> {
    pub step_id: &'a StepId,
    pub declared_outputs: &'a [String],
    pub llm: &'a dyn LlmClient,
}

/// A tool instance. One instance is built per step per run, so a tool may
/// keep state across re-entries of the same step within a run.
#[async_trait::async_trait]
pub trait Tool: Send {
    async fn execute(
        &mut self,
        inputs: &ToolInputs,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutputs, ToolError>;

    /// Local inputs this tool can currently run without. Unresolvable paths
    /// for these are left out of the inputs instead of failing the run.
    fn optional_inputs(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Constructs tools of one kind from their configuration
pub trait ToolFactory: Send + Sync {
    /// Registry identifier, e.g. `RegexParserTool`
    fn name(&self) -> &str;

    fn create(&self, config: &Value) -> Result<Box<dyn Tool>, ToolError>;

    /// Build-time check of an agent using this tool
    fn validate(&self, agent: &AgentSpec) -> Result<(), ToolError> {
        self.create(&agent.tool_config_or_empty()).map(|_| ())
    }

    /// Step ids this tool may jump to through the override signal
    fn branch_targets(&self, _config: &Value) -> Vec<StepId> {
        Vec::new()
    }

    /// For loop tools: the first step of the body, which must route back
    fn loop_body_start(&self, _config: &Value) -> Option<StepId> {
        None
    }
}

/// Fetch a required input
pub fn require_input<'a>(inputs: &'a ToolInputs, name: &str) -> Result<&'a Value, ToolError> {
    inputs
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| ToolError::MissingInput(name.to_string()))
}
