//! Error taxonomy for pipeline runs.
//!
//! Every error is fatal: a run either completes with its final outputs or
//! aborts with exactly one of these, naming the failing step when there is one.

use crate::state::ResolutionError;
use crate::template::TemplateError;
use crate::types::StepId;

/// Broad category of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Resolution,
    Template,
    Execution,
    RunawayPipeline,
}

/// Result type for engine operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed definition or tool configuration.
    #[error("Configuration error{}: {message}", at_step(.step))]
    Configuration {
        step: Option<StepId>,
        message: String,
    },

    /// `start_agent` names no declared agent.
    #[error("Start agent '{0}' is not defined")]
    MissingStartAgent(StepId),

    /// No routing entry exists for a step and no override was produced.
    #[error("No routing entry for step '{step}'")]
    MissingRoute { step: StepId },

    /// Agent type is neither built in nor a registered tool.
    #[error("Unsupported agent type '{agent_type}' for step '{step}'")]
    UnsupportedAgentType { step: StepId, agent_type: String },

    /// An input or final-output path could not be resolved.
    #[error("Resolution error{}: {source}", at_step(.step))]
    Resolution {
        step: Option<StepId>,
        #[source]
        source: ResolutionError,
    },

    /// A prompt template could not be parsed or rendered.
    #[error("Template error in step '{step}': {source}")]
    Template {
        step: StepId,
        #[source]
        source: TemplateError,
    },

    /// A delegate (LLM or tool) failed while executing a step.
    #[error("Step '{step}' failed: {source}")]
    Execution {
        step: StepId,
        #[source]
        source: anyhow::Error,
    },

    /// The run exceeded its step execution ceiling.
    #[error("Pipeline exceeded {limit} step executions (next step '{step}')")]
    RunawayPipeline { limit: usize, step: StepId },
}

fn at_step(step: &Option<StepId>) -> String {
    match step {
        Some(step) => format!(" in step '{}'", step),
        None => String::new(),
    }
}

impl PipelineError {
    pub fn config(step: Option<&StepId>, message: impl Into<String>) -> Self {
        Self::Configuration {
            step: step.cloned(),
            message: message.into(),
        }
    }

    pub fn execution(step: &StepId, source: impl Into<anyhow::Error>) -> Self {
        Self::Execution {
            step: step.clone(),
            source: source.into(),
        }
    }

    /// The category this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. }
            | Self::MissingStartAgent(_)
            | Self::MissingRoute { .. }
            | Self::UnsupportedAgentType { .. } => ErrorKind::Configuration,
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Template { .. } => ErrorKind::Template,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::RunawayPipeline { .. } => ErrorKind::RunawayPipeline,
        }
    }

    /// The step that was executing (or being validated) when the error occurred
    pub fn step_id(&self) -> Option<&StepId> {
        match self {
            Self::Configuration { step, .. } | Self::Resolution { step, .. } => step.as_ref(),
            Self::MissingStartAgent(step) => Some(step),
            Self::MissingRoute { step }
            | Self::UnsupportedAgentType { step, .. }
            | Self::Template { step, .. }
            | Self::Execution { step, .. }
            | Self::RunawayPipeline { step, .. } => Some(step),
        }
    }
}
