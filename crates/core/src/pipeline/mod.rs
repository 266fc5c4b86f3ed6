pub mod executor;
pub mod graph;
pub mod inputs;
pub mod router;
pub mod step_executor;

pub use executor::{PipelineExecutor, RunOutcome};
pub use graph::RoutingGraph;
pub use inputs::{resolve_inputs, InputBinding, InputSource};
pub use router::{Router, Routing};
pub use step_executor::{StepExecutor, StepOutputs};

use crate::error::{PipelineError, PipelineResult};
use crate::template::PromptTemplate;
use crate::tools::ToolRegistry;
use crate::types::{
    AgentSpec, EngineOptions, OutputFormat, PipelineDefinition, StepId, LLM_AGENT_TYPE,
    TOOL_AGENT_TYPE,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How a step is executed, decided once when the pipeline is built
#[derive(Debug, Clone)]
pub enum AgentKind {
    Llm {
        model: String,
        template: PromptTemplate,
        format: OutputFormat,
    },
    Tool {
        tool_name: String,
    },
}

/// A validated agent with its inputs classified and template parsed
#[derive(Debug, Clone)]
pub struct CompiledStep {
    pub spec: AgentSpec,
    pub kind: AgentKind,
    pub inputs: Vec<InputBinding>,
}

impl CompiledStep {
    pub fn id(&self) -> &StepId {
        &self.spec.id
    }
}

/// An immutable, validated pipeline ready to run any number of times
#[derive(Debug)]
pub struct Pipeline {
    definition: PipelineDefinition,
    steps: HashMap<StepId, CompiledStep>,
    router: Router,
    registry: Arc<ToolRegistry>,
    options: EngineOptions,
}

impl Pipeline {
    /// Validate a definition against the registry and compile its steps
    pub fn build(
        definition: PipelineDefinition,
        registry: Arc<ToolRegistry>,
        options: EngineOptions,
    ) -> PipelineResult<Self> {
        let mut seen = HashSet::new();
        for agent in &definition.agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(PipelineError::config(Some(&agent.id), "duplicate agent id"));
            }
        }

        if !seen.contains(definition.start_agent.as_str()) {
            return Err(PipelineError::MissingStartAgent(
                definition.start_agent.clone(),
            ));
        }

        let mut steps = HashMap::new();
        for agent in &definition.agents {
            let step = compile_step(agent, &seen, &registry, &options)?;
            steps.insert(agent.id.clone(), step);
        }

        let graph = routing_graph(&definition, &steps, &registry)?;

        for step in graph.reachable_from(&definition.start_agent)? {
            if !definition.routing.contains_key(&step) {
                return Err(PipelineError::MissingRoute { step });
            }
        }

        for step in steps.values() {
            if let AgentKind::Tool { tool_name } = &step.kind {
                let config = step.spec.tool_config_or_empty();
                let body_start = registry
                    .lookup(tool_name)
                    .and_then(|factory| factory.loop_body_start(&config));
                if let Some(body_start) = body_start {
                    if &body_start == step.id() {
                        return Err(PipelineError::config(
                            Some(step.id()),
                            "loop body cannot start at the controller itself",
                        ));
                    }
                    if !graph.static_path_exists(&body_start, step.id())? {
                        return Err(PipelineError::config(
                            Some(step.id()),
                            format!(
                                "loop body starting at '{}' never routes back to the controller",
                                body_start
                            ),
                        ));
                    }
                }
            }
        }

        tracing::debug!(
            "Built pipeline '{}' with {} steps",
            definition.pipeline_name,
            steps.len()
        );

        Ok(Self {
            router: Router::new(definition.routing.clone()),
            definition,
            steps,
            registry,
            options,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.pipeline_name
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Look up a compiled step; an unknown id is a configuration error
    pub fn step(&self, id: &StepId) -> PipelineResult<&CompiledStep> {
        self.steps
            .get(id)
            .ok_or_else(|| PipelineError::config(Some(id), "step is not defined"))
    }
}

fn compile_step(
    agent: &AgentSpec,
    step_ids: &HashSet<&str>,
    registry: &ToolRegistry,
    options: &EngineOptions,
) -> PipelineResult<CompiledStep> {
    let inputs: Vec<InputBinding> = agent
        .inputs
        .iter()
        .map(|(name, configured)| InputBinding::classify(name, configured, step_ids))
        .collect();

    let kind = classify_agent(agent, registry, options)?;

    match &kind {
        AgentKind::Llm { template, .. } => {
            for placeholder in template.placeholders() {
                if !agent.inputs.contains_key(placeholder) {
                    return Err(PipelineError::Template {
                        step: agent.id.clone(),
                        source: crate::template::TemplateError::MissingPlaceholder {
                            name: placeholder.to_string(),
                        },
                    });
                }
            }
        }
        AgentKind::Tool { tool_name } => {
            let factory = registry.lookup(tool_name).ok_or_else(|| {
                PipelineError::UnsupportedAgentType {
                    step: agent.id.clone(),
                    agent_type: tool_name.clone(),
                }
            })?;
            factory
                .validate(agent)
                .map_err(|e| PipelineError::config(Some(&agent.id), e.to_string()))?;
        }
    }

    Ok(CompiledStep {
        spec: agent.clone(),
        kind,
        inputs,
    })
}

/// `llm_agent`, `tool_agent`, or a registered tool name used directly as the type
fn classify_agent(
    agent: &AgentSpec,
    registry: &ToolRegistry,
    options: &EngineOptions,
) -> PipelineResult<AgentKind> {
    match agent.agent_type.as_str() {
        LLM_AGENT_TYPE => {
            let model = agent
                .model
                .clone()
                .or_else(|| options.default_model.clone())
                .ok_or_else(|| {
                    PipelineError::config(Some(&agent.id), "LLM agent has no model and no default model is set")
                })?;
            let text = agent.prompt_template.as_deref().ok_or_else(|| {
                PipelineError::config(Some(&agent.id), "LLM agent has no prompt_template")
            })?;
            let template = PromptTemplate::parse(text).map_err(|source| PipelineError::Template {
                step: agent.id.clone(),
                source,
            })?;
            if agent.outputs.len() != 1 {
                return Err(PipelineError::config(
                    Some(&agent.id),
                    format!(
                        "LLM agent must declare exactly one output, found {}",
                        agent.outputs.len()
                    ),
                ));
            }
            Ok(AgentKind::Llm {
                model,
                template,
                format: agent.output_format.unwrap_or_default(),
            })
        }
        TOOL_AGENT_TYPE => {
            let tool_name = agent.tool_name.clone().ok_or_else(|| {
                PipelineError::config(Some(&agent.id), "tool agent has no tool_name")
            })?;
            Ok(AgentKind::Tool { tool_name })
        }
        other if registry.contains(other) => Ok(AgentKind::Tool {
            tool_name: other.to_string(),
        }),
        other => Err(PipelineError::UnsupportedAgentType {
            step: agent.id.clone(),
            agent_type: other.to_string(),
        }),
    }
}

fn routing_graph(
    definition: &PipelineDefinition,
    steps: &HashMap<StepId, CompiledStep>,
    registry: &ToolRegistry,
) -> PipelineResult<RoutingGraph> {
    let mut graph = RoutingGraph::new(definition.agents.iter().map(|a| &a.id));

    for (from, entry) in &definition.routing {
        if !steps.contains_key(from) {
            return Err(PipelineError::config(
                Some(from),
                "routing entry for a step that is not defined",
            ));
        }
        if let Some(next) = entry.next.as_ref().filter(|n| !n.as_str().is_empty()) {
            graph.add_static_edge(from, next)?;
        }
    }

    for step in steps.values() {
        if let AgentKind::Tool { tool_name } = &step.kind {
            if let Some(factory) = registry.lookup(tool_name) {
                for target in factory.branch_targets(&step.spec.tool_config_or_empty()) {
                    graph.add_override_edge(step.id(), &target)?;
                }
            }
        }
    }

    Ok(graph)
}
