use super::step_executor::{StepExecutor, ToolInstances};
use super::Pipeline;
use crate::error::{PipelineError, PipelineResult};
use crate::llm::LlmClient;
use crate::state::StateStore;
use crate::types::{RunId, StepId, StepRecord};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: RunId,
    /// Declared final outputs, or every state entry when none are declared
    pub outputs: Map<String, Value>,
    pub state: StateStore,
    /// Executed steps in order
    pub trace: Vec<StepRecord>,
}

impl RunOutcome {
    /// Step ids in execution order
    pub fn executed_steps(&self) -> Vec<&StepId> {
        self.trace.iter().map(|r| &r.step_id).collect()
    }
}

/// Everything one run owns; never shared between runs
struct RunContext {
    run_id: RunId,
    state: StateStore,
    tools: ToolInstances,
    trace: Vec<StepRecord>,
}

/// Drives a pipeline from its start agent until routing yields no next step
pub struct PipelineExecutor {
    pipeline: Arc<Pipeline>,
    step_executor: StepExecutor,
}

impl PipelineExecutor {
    pub fn new(pipeline: Arc<Pipeline>, llm: Arc<dyn LlmClient>) -> Self {
        let step_executor = StepExecutor::new(llm, pipeline.registry().clone());
        Self {
            pipeline,
            step_executor,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Execute the pipeline with its configured initial input
    pub async fn run(&self) -> PipelineResult<RunOutcome> {
        let initial_input = self.pipeline.definition().initial_input.clone();
        self.run_with_input(initial_input).await
    }

    /// Execute the pipeline with a caller-provided initial input
    pub async fn run_with_input(&self, initial_input: Value) -> PipelineResult<RunOutcome> {
        let mut ctx = RunContext {
            run_id: RunId::new(),
            state: StateStore::new(initial_input),
            tools: ToolInstances::new(),
            trace: Vec::new(),
        };

        tracing::info!(
            "Starting pipeline '{}': run_id={}",
            self.pipeline.name(),
            ctx.run_id
        );

        match self.drive(&mut ctx).await {
            Ok(outputs) => {
                tracing::info!(
                    "Pipeline finished: run_id={}, steps={}",
                    ctx.run_id,
                    ctx.trace.len()
                );
                Ok(RunOutcome {
                    run_id: ctx.run_id,
                    outputs,
                    state: ctx.state,
                    trace: ctx.trace,
                })
            }
            Err(e) => {
                tracing::error!("Pipeline failed: run_id={}, error={}", ctx.run_id, e);
                Err(e)
            }
        }
    }

    async fn drive(&self, ctx: &mut RunContext) -> PipelineResult<Map<String, Value>> {
        let max_steps = self.pipeline.options().max_steps;
        let mut current = Some(self.pipeline.definition().start_agent.clone());

        while let Some(step_id) = current {
            if ctx.trace.len() >= max_steps {
                return Err(PipelineError::RunawayPipeline {
                    limit: max_steps,
                    step: step_id,
                });
            }

            let step = self.pipeline.step(&step_id)?;
            tracing::info!("Executing step: {}", step_id);

            let started_at = chrono::Utc::now();
            let outputs = self
                .step_executor
                .execute(step, &ctx.state, &mut ctx.tools)
                .await?;
            let completed_at = chrono::Utc::now();

            ctx.state.mark_executed(&step_id);
            let produced: Vec<String> = outputs.values.keys().cloned().collect();
            for (name, value) in outputs.values {
                ctx.state.set(&step_id, &name, value);
            }

            let routing = self
                .pipeline
                .router()
                .decide(&step_id, outputs.next_step.as_deref())?;

            tracing::info!(
                "Step {} produced {:?}, next: {} ({:?})",
                step_id,
                produced,
                routing.next.as_ref().map(StepId::as_str).unwrap_or("<end>"),
                routing.source
            );

            ctx.trace.push(StepRecord {
                step_id,
                started_at,
                completed_at,
                outputs: produced,
                next: routing.next.clone(),
                routed_by: routing.source,
            });

            current = routing.next;
        }

        self.final_outputs(&ctx.state)
    }

    /// Resolve the declared final outputs against the finished state
    fn final_outputs(&self, state: &StateStore) -> PipelineResult<Map<String, Value>> {
        let declared = &self.pipeline.definition().final_outputs;
        if declared.is_empty() {
            return Ok(state.snapshot());
        }

        declared
            .iter()
            .map(|(name, path)| -> PipelineResult<(String, Value)> {
                let value = state
                    .resolve(path)
                    .map_err(|source| PipelineError::Resolution { step: None, source })?;
                Ok((name.clone(), value.clone()))
            })
            .collect()
    }
}
