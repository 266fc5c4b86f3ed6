use super::inputs::resolve_inputs;
use super::{AgentKind, CompiledStep};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::LlmClient;
use crate::state::StateStore;
use crate::tools::{Tool, ToolContext, ToolError, ToolRegistry};
use crate::types::{OutputFormat, StepId, NEXT_STEP_KEY};
use crate::template::PromptTemplate;
use serde_json::{Map, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

/// Tool instances of one run, keyed by the step that owns them
pub type ToolInstances = HashMap<StepId, Box<dyn Tool>>;

/// Normalized outputs of one step execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutputs {
    /// Exactly the step's declared outputs
    pub values: Map<String, Value>,
    /// Routing override, if the step produced one
    pub next_step: Option<String>,
}

/// Dispatches a step to the LLM or to its tool and normalizes the result
pub struct StepExecutor {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
}

impl StepExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>) -> Self {
        Self { llm, registry }
    }

    /// Resolve the step's inputs from `state` and execute it
    pub async fn execute(
        &self,
        step: &CompiledStep,
        state: &StateStore,
        tools: &mut ToolInstances,
    ) -> PipelineResult<StepOutputs> {
        match &step.kind {
            AgentKind::Llm {
                model,
                template,
                format,
            } => self.execute_llm(step, state, model, template, *format).await,
            AgentKind::Tool { tool_name } => {
                self.execute_tool(step, state, tool_name, tools).await
            }
        }
    }

    async fn execute_llm(
        &self,
        step: &CompiledStep,
        state: &StateStore,
        model: &str,
        template: &PromptTemplate,
        format: OutputFormat,
    ) -> PipelineResult<StepOutputs> {
        let inputs = resolve_inputs(&step.inputs, state, &[]).map_err(|source| {
            PipelineError::Resolution {
                step: Some(step.id().clone()),
                source,
            }
        })?;

        let prompt = template
            .render(&inputs)
            .map_err(|source| PipelineError::Template {
                step: step.id().clone(),
                source,
            })?;

        tracing::debug!("Invoking model {} for step {}", model, step.id());

        let raw = self
            .llm
            .invoke(model, &prompt)
            .await
            .map_err(|e| PipelineError::execution(step.id(), e))?;

        let value = format
            .apply(raw)
            .map_err(|e| PipelineError::execution(step.id(), e))?;

        let mut produced = Map::new();
        if let Some(name) = step.spec.outputs.first() {
            produced.insert(name.clone(), value);
        }
        normalize_outputs(step, produced)
    }

    async fn execute_tool(
        &self,
        step: &CompiledStep,
        state: &StateStore,
        tool_name: &str,
        tools: &mut ToolInstances,
    ) -> PipelineResult<StepOutputs> {
        let tool = match tools.entry(step.id().clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.create_tool(step, tool_name)?),
        };

        let optional = tool.optional_inputs();
        let inputs = resolve_inputs(&step.inputs, state, &optional).map_err(|source| {
            PipelineError::Resolution {
                step: Some(step.id().clone()),
                source,
            }
        })?;

        let ctx = ToolContext {
            step_id: step.id(),
            declared_outputs: &step.spec.outputs,
            llm: self.llm.as_ref(),
        };

        tracing::debug!("Running tool {} for step {}", tool_name, step.id());

        let produced = tool.execute(&inputs, &ctx).await.map_err(|e| match e {
            ToolError::InvalidConfig(message) => PipelineError::config(Some(step.id()), message),
            other => PipelineError::execution(step.id(), other),
        })?;

        normalize_outputs(step, produced)
    }

    fn create_tool(&self, step: &CompiledStep, tool_name: &str) -> PipelineResult<Box<dyn Tool>> {
        let factory =
            self.registry
                .lookup(tool_name)
                .ok_or_else(|| PipelineError::UnsupportedAgentType {
                    step: step.id().clone(),
                    agent_type: tool_name.to_string(),
                })?;

        factory
            .create(&step.spec.tool_config_or_empty())
            .map_err(|e| PipelineError::config(Some(step.id()), e.to_string()))
    }
}

/// Keep exactly the declared outputs and split off the routing override
pub fn normalize_outputs(
    step: &CompiledStep,
    mut produced: Map<String, Value>,
) -> PipelineResult<StepOutputs> {
    let next_step = match produced.remove(NEXT_STEP_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id),
        Some(other) => {
            return Err(PipelineError::config(
                Some(step.id()),
                format!("{} must be a step id string, got {}", NEXT_STEP_KEY, other),
            ))
        }
    };

    let mut values = Map::new();
    for name in &step.spec.outputs {
        let value = produced.remove(name).ok_or_else(|| {
            PipelineError::execution(
                step.id(),
                anyhow::anyhow!("did not produce declared output '{}'", name),
            )
        })?;
        values.insert(name.clone(), value);
    }

    if !produced.is_empty() {
        tracing::debug!(
            "Step {} ignored undeclared outputs: {:?}",
            step.id(),
            produced.keys().collect::<Vec<_>>()
        );
    }

    Ok(StepOutputs { values, next_step })
}
