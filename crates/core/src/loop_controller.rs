//! Bounded re-entrant loops.
//!
//! A loop controller is a tool step that the loop body routes back to. On its
//! first execution it fixes the iteration bound and sends control to the body
//! start; on each re-entry it appends the body's latest outputs to its
//! accumulators and either re-enters the body or, once the bound is reached,
//! publishes the finished lists and jumps to its exit step.
//!
//! The counter it publishes is the number of completed iterations before the
//! body pass about to run.

use crate::tools::{Tool, ToolContext, ToolError, ToolFactory, ToolInputs, ToolOutputs};
use crate::types::{AgentSpec, StepId, NEXT_STEP_KEY};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Registry name of the loop controller tool
pub const LOOP_CONTROLLER_TOOL: &str = "LoopController";

/// Iteration bound: a literal count or the name of a local input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IterationBound {
    Literal(i64),
    Input(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub total_iterations_from: IterationBound,
    pub loop_body_start_id: StepId,
    pub counter_name: String,
    /// Accumulator name to the local input collected on each re-entry
    #[serde(default)]
    pub accumulators: BTreeMap<String, String>,
    #[serde(default)]
    pub else_execute_step: Option<StepId>,
}

impl LoopConfig {
    pub fn from_value(config: &Value) -> Result<Self, ToolError> {
        serde_json::from_value(config.clone())
            .map_err(|e| ToolError::InvalidConfig(format!("loop config: {}", e)))
    }

    /// Check the loop against the agent that hosts it
    pub fn check_agent(&self, agent: &AgentSpec) -> Result<(), ToolError> {
        if self.counter_name.is_empty() {
            return Err(ToolError::InvalidConfig("counter_name is empty".to_string()));
        }

        let mut published = vec![&self.counter_name];
        published.extend(self.accumulators.keys());
        for name in published {
            if !agent.outputs.contains(name) {
                return Err(ToolError::InvalidConfig(format!(
                    "loop output '{}' is not declared in outputs",
                    name
                )));
            }
        }

        let mut consumed: Vec<&String> = self.accumulators.values().collect();
        if let IterationBound::Input(name) = &self.total_iterations_from {
            consumed.push(name);
        }
        for name in consumed {
            if !agent.inputs.contains_key(name) {
                return Err(ToolError::InvalidConfig(format!(
                    "loop input '{}' is not declared in inputs",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Progress of a loop that is currently iterating
#[derive(Debug, Clone, PartialEq)]
pub struct LoopState {
    pub completed: u64,
    pub total: u64,
    pub accumulated: BTreeMap<String, Vec<Value>>,
}

/// Loop controller instance; owns its loop state for the duration of a run
#[derive(Debug)]
pub struct LoopController {
    config: LoopConfig,
    state: Option<LoopState>,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// The in-progress loop, if one is iterating
    pub fn state(&self) -> Option<&LoopState> {
        self.state.as_ref()
    }

    fn resolve_bound(&self, inputs: &ToolInputs) -> Result<i64, ToolError> {
        let name = match &self.config.total_iterations_from {
            IterationBound::Literal(n) => return Ok(*n),
            IterationBound::Input(name) => name,
        };

        let value = inputs.get(name).ok_or_else(|| {
            ToolError::InvalidConfig(format!(
                "total_iterations_from input '{}' is not among the resolved inputs",
                name
            ))
        })?;

        let bound = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };

        bound.ok_or_else(|| {
            ToolError::InvalidConfig(format!(
                "total_iterations_from input '{}' is not an integer: {}",
                name, value
            ))
        })
    }

    fn emit(&self, completed: u64, accumulated: &BTreeMap<String, Vec<Value>>, next: Option<&StepId>) -> ToolOutputs {
        let mut outputs = ToolOutputs::new();
        outputs.insert(self.config.counter_name.clone(), json!(completed));
        for (name, items) in accumulated {
            outputs.insert(name.clone(), Value::Array(items.clone()));
        }
        if let Some(next) = next {
            outputs.insert(NEXT_STEP_KEY.to_string(), json!(next.as_str()));
        }
        outputs
    }

    fn empty_accumulators(&self) -> BTreeMap<String, Vec<Value>> {
        self.config
            .accumulators
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect()
    }
}

#[async_trait::async_trait]
impl Tool for LoopController {
    async fn execute(
        &mut self,
        inputs: &ToolInputs,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutputs, ToolError> {
        let Some(mut state) = self.state.take() else {
            let bound = self.resolve_bound(inputs)?;
            let accumulated = self.empty_accumulators();

            if bound <= 0 {
                tracing::debug!("Loop {} has bound {}, skipping body", ctx.step_id, bound);
                return Ok(self.emit(0, &accumulated, self.config.else_execute_step.as_ref()));
            }

            tracing::debug!("Loop {} starting: {} iterations", ctx.step_id, bound);
            let outputs = self.emit(0, &accumulated, Some(&self.config.loop_body_start_id));
            self.state = Some(LoopState {
                completed: 0,
                total: bound as u64,
                accumulated,
            });
            return Ok(outputs);
        };

        for (acc_name, source) in &self.config.accumulators {
            let value = inputs
                .get(source)
                .cloned()
                .ok_or_else(|| ToolError::MissingInput(source.clone()))?;
            state
                .accumulated
                .entry(acc_name.clone())
                .or_default()
                .push(value);
        }
        state.completed += 1;

        if state.completed >= state.total {
            tracing::debug!(
                "Loop {} finished after {} iterations",
                ctx.step_id,
                state.completed
            );
            return Ok(self.emit(
                state.completed,
                &state.accumulated,
                self.config.else_execute_step.as_ref(),
            ));
        }

        tracing::debug!(
            "Loop {} iteration {}/{}",
            ctx.step_id,
            state.completed + 1,
            state.total
        );
        let outputs = self.emit(
            state.completed,
            &state.accumulated,
            Some(&self.config.loop_body_start_id),
        );
        self.state = Some(state);
        Ok(outputs)
    }

    fn optional_inputs(&self) -> Vec<String> {
        // The body has not produced anything before the first pass
        if self.state.is_none() {
            self.config.accumulators.values().cloned().collect()
        } else {
            Vec::new()
        }
    }
}

/// Factory registered as `LoopController`
#[derive(Debug, Default)]
pub struct LoopControllerFactory;

impl ToolFactory for LoopControllerFactory {
    fn name(&self) -> &str {
        LOOP_CONTROLLER_TOOL
    }

    fn create(&self, config: &Value) -> Result<Box<dyn Tool>, ToolError> {
        Ok(Box::new(LoopController::new(LoopConfig::from_value(config)?)))
    }

    fn validate(&self, agent: &AgentSpec) -> Result<(), ToolError> {
        LoopConfig::from_value(&agent.tool_config_or_empty())?.check_agent(agent)
    }

    fn branch_targets(&self, config: &Value) -> Vec<StepId> {
        match LoopConfig::from_value(config) {
            Ok(cfg) => std::iter::once(cfg.loop_body_start_id)
                .chain(cfg.else_execute_step)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn loop_body_start(&self, config: &Value) -> Option<StepId> {
        LoopConfig::from_value(config)
            .ok()
            .map(|cfg| cfg.loop_body_start_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, LlmError};

    struct NoLlm;

    #[async_trait::async_trait]
    impl LlmClient for NoLlm {
        async fn invoke(&self, _model: &str, _prompt: &str) -> Result<String, LlmError> {
            Err(LlmError::Request("not available".to_string()))
        }
    }

    fn controller(bound: Value) -> LoopController {
        let config = LoopConfig::from_value(&json!({
            "total_iterations_from": bound,
            "loop_body_start_id": "body",
            "counter_name": "i",
            "accumulators": {"all_x": "x"},
            "else_execute_step": "after"
        }))
        .unwrap();
        LoopController::new(config)
    }

    fn inputs(value: Value) -> ToolInputs {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_three_iterations() {
        let step = StepId::new("loop");
        let ctx = ToolContext {
            step_id: &step,
            declared_outputs: &[],
            llm: &NoLlm,
        };
        let mut ctl = controller(json!(3));

        let first = ctl.execute(&inputs(json!({})), &ctx).await.unwrap();
        assert_eq!(first["i"], json!(0));
        assert_eq!(first[NEXT_STEP_KEY], json!("body"));
        assert_eq!(ctl.optional_inputs(), Vec::<String>::new());

        let second = ctl.execute(&inputs(json!({"x": "a"})), &ctx).await.unwrap();
        assert_eq!(second["i"], json!(1));
        assert_eq!(second[NEXT_STEP_KEY], json!("body"));

        let third = ctl.execute(&inputs(json!({"x": "b"})), &ctx).await.unwrap();
        assert_eq!(third["i"], json!(2));
        assert_eq!(third["all_x"], json!(["a", "b"]));

        let done = ctl.execute(&inputs(json!({"x": "c"})), &ctx).await.unwrap();
        assert_eq!(done["i"], json!(3));
        assert_eq!(done["all_x"], json!(["a", "b", "c"]));
        assert_eq!(done[NEXT_STEP_KEY], json!("after"));
        assert!(ctl.state().is_none());
    }

    #[tokio::test]
    async fn test_zero_bound_skips_body() {
        let step = StepId::new("loop");
        let ctx = ToolContext {
            step_id: &step,
            declared_outputs: &[],
            llm: &NoLlm,
        };
        let mut ctl = controller(json!("n"));
        assert_eq!(ctl.optional_inputs(), vec!["x".to_string()]);

        let out = ctl.execute(&inputs(json!({"n": 0})), &ctx).await.unwrap();
        assert_eq!(out["i"], json!(0));
        assert_eq!(out["all_x"], json!([]));
        assert_eq!(out[NEXT_STEP_KEY], json!("after"));
        assert!(ctl.state().is_none());
    }

    #[tokio::test]
    async fn test_bound_from_numeric_string_input() {
        let step = StepId::new("loop");
        let ctx = ToolContext {
            step_id: &step,
            declared_outputs: &[],
            llm: &NoLlm,
        };
        let mut ctl = controller(json!("n"));
        ctl.execute(&inputs(json!({"n": "2"})), &ctx).await.unwrap();
        assert_eq!(ctl.state().unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_non_integer_bound_is_config_error() {
        let step = StepId::new("loop");
        let ctx = ToolContext {
            step_id: &step,
            declared_outputs: &[],
            llm: &NoLlm,
        };
        for bad in [json!(2.5), json!("three"), json!(true)] {
            let mut ctl = controller(json!("n"));
            let err = ctl
                .execute(&inputs(json!({"n": bad})), &ctx)
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidConfig(_)));
        }
    }

    #[test]
    fn test_literal_float_bound_rejected_at_parse() {
        let result = LoopConfig::from_value(&json!({
            "total_iterations_from": 1.5,
            "loop_body_start_id": "body",
            "counter_name": "i"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_check_agent_requires_declared_outputs() {
        let config = LoopConfig::from_value(&json!({
            "total_iterations_from": "n",
            "loop_body_start_id": "body",
            "counter_name": "i",
            "accumulators": {"all_x": "x"}
        }))
        .unwrap();

        let mut agent: AgentSpec = serde_json::from_value(json!({
            "id": "loop",
            "type": "LoopController",
            "inputs": {"n": 2, "x": "body.x"},
            "outputs": ["i"]
        }))
        .unwrap();
        assert!(config.check_agent(&agent).is_err());

        agent.outputs.push("all_x".to_string());
        assert!(config.check_agent(&agent).is_ok());

        agent.inputs.remove("n");
        assert!(config.check_agent(&agent).is_err());
    }
}
