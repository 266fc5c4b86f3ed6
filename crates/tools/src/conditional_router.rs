// Condition-based branching, and loop control when `loop_config` is present

use pipewright_core::loop_controller::{LoopConfig, LoopController};
use pipewright_core::template::value_to_text;
use pipewright_core::tools::{Tool, ToolContext, ToolError, ToolFactory, ToolInputs, ToolOutputs};
use pipewright_core::{AgentSpec, StepId, NEXT_STEP_KEY};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const CONDITIONAL_ROUTER_TOOL: &str = "ConditionalRouterTool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Local input name to test
    pub variable: String,
    pub operator: Operator,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(rename = "if")]
    pub condition: Condition,
    pub then_execute_step: StepId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub condition_groups: Vec<ConditionGroup>,
    #[serde(default)]
    pub else_execute_step: Option<StepId>,
    #[serde(default)]
    pub loop_config: Option<Value>,
}

impl RouterConfig {
    pub fn from_value(config: &Value) -> Result<Self, ToolError> {
        serde_json::from_value(config.clone())
            .map_err(|e| ToolError::InvalidConfig(format!("router config: {}", e)))
    }

    /// The loop this router drives, if it is configured as one. The
    /// top-level else step is the loop exit unless `loop_config` names one.
    pub fn loop_config(&self) -> Result<Option<LoopConfig>, ToolError> {
        let Some(raw) = &self.loop_config else {
            return Ok(None);
        };

        let mut merged = raw.clone();
        if let (Value::Object(map), Some(exit)) = (&mut merged, &self.else_execute_step) {
            map.entry("else_execute_step")
                .or_insert_with(|| json!(exit.as_str()));
        }
        LoopConfig::from_value(&merged).map(Some)
    }
}

/// Numeric view of a value: numbers and numeric strings
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => value_to_text(left) == value_to_text(right),
    }
}

/// Evaluate a single condition against the resolved inputs
pub fn evaluate_condition(condition: &Condition, inputs: &ToolInputs) -> bool {
    let Some(left) = inputs.get(&condition.variable) else {
        return false;
    };
    let right = &condition.value;

    match condition.operator {
        Operator::Equals => values_equal(left, right),
        Operator::NotEquals => !values_equal(left, right),
        Operator::Contains => match left {
            Value::Array(items) => items.iter().any(|item| values_equal(item, right)),
            Value::Object(map) => map.contains_key(&value_to_text(right)),
            Value::String(text) => text.contains(&value_to_text(right)),
            _ => false,
        },
        op => {
            let ordering = match (as_number(left), as_number(right)) {
                (Some(l), Some(r)) => l.partial_cmp(&r),
                _ => Some(value_to_text(left).cmp(&value_to_text(right))),
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                Operator::Gt => ordering.is_gt(),
                Operator::Lt => ordering.is_lt(),
                Operator::Gte => ordering.is_ge(),
                Operator::Lte => ordering.is_le(),
                _ => false,
            }
        }
    }
}

/// Routes to the first group whose condition holds
#[derive(Debug)]
pub struct ConditionalRouterTool {
    config: RouterConfig,
}

impl ConditionalRouterTool {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// The chosen target, or `None` to leave routing to the static table
    pub fn choose(&self, inputs: &ToolInputs) -> Option<&StepId> {
        self.config
            .condition_groups
            .iter()
            .find(|group| evaluate_condition(&group.condition, inputs))
            .map(|group| &group.then_execute_step)
            .or(self.config.else_execute_step.as_ref())
    }
}

#[async_trait::async_trait]
impl Tool for ConditionalRouterTool {
    async fn execute(
        &mut self,
        inputs: &ToolInputs,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutputs, ToolError> {
        let mut outputs = ToolOutputs::new();
        match self.choose(inputs) {
            Some(target) => {
                tracing::debug!("Router {} chose {}", ctx.step_id, target);
                outputs.insert(NEXT_STEP_KEY.to_string(), json!(target.as_str()));
            }
            None => tracing::debug!("Router {} matched no branch", ctx.step_id),
        }
        Ok(outputs)
    }
}

#[derive(Debug, Default)]
pub struct ConditionalRouterFactory;

impl ToolFactory for ConditionalRouterFactory {
    fn name(&self) -> &str {
        CONDITIONAL_ROUTER_TOOL
    }

    fn create(&self, config: &Value) -> Result<Box<dyn Tool>, ToolError> {
        let config = RouterConfig::from_value(config)?;
        match config.loop_config()? {
            Some(loop_config) => Ok(Box::new(LoopController::new(loop_config))),
            None => Ok(Box::new(ConditionalRouterTool::new(config))),
        }
    }

    fn validate(&self, agent: &AgentSpec) -> Result<(), ToolError> {
        let config = RouterConfig::from_value(&agent.tool_config_or_empty())?;
        match config.loop_config()? {
            Some(loop_config) => loop_config.check_agent(agent),
            None => Ok(()),
        }
    }

    fn branch_targets(&self, config: &Value) -> Vec<StepId> {
        let Ok(config) = RouterConfig::from_value(config) else {
            return Vec::new();
        };

        if let Ok(Some(loop_config)) = config.loop_config() {
            return std::iter::once(loop_config.loop_body_start_id)
                .chain(loop_config.else_execute_step)
                .collect();
        }

        config
            .condition_groups
            .into_iter()
            .map(|group| group.then_execute_step)
            .chain(config.else_execute_step)
            .collect()
    }

    fn loop_body_start(&self, config: &Value) -> Option<StepId> {
        RouterConfig::from_value(config)
            .ok()?
            .loop_config()
            .ok()
            .flatten()
            .map(|cfg| cfg.loop_body_start_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_core::llm::{LlmClient, LlmError};

    struct NoLlm;

    #[async_trait::async_trait]
    impl LlmClient for NoLlm {
        async fn invoke(&self, _model: &str, _prompt: &str) -> Result<String, LlmError> {
            Err(LlmError::Request("not available".to_string()))
        }
    }

    async fn route(config: Value, inputs: Value) -> ToolOutputs {
        let step = StepId::new("router");
        let ctx = ToolContext {
            step_id: &step,
            declared_outputs: &[],
            llm: &NoLlm,
        };
        let mut tool = ConditionalRouterFactory.create(&config).unwrap();
        tool.execute(inputs.as_object().unwrap(), &ctx).await.unwrap()
    }

    fn single(variable: &str, operator: &str, value: Value, target: &str) -> Value {
        json!({
            "condition_groups": [{
                "if": {"variable": variable, "operator": operator, "value": value},
                "then_execute_step": target
            }]
        })
    }

    #[tokio::test]
    async fn test_condition_met() {
        let mut config = single("status", "equals", json!("active"), "active_step");
        config["else_execute_step"] = json!("inactive_step");

        let out = route(config.clone(), json!({"status": "active"})).await;
        assert_eq!(out[NEXT_STEP_KEY], json!("active_step"));

        let out = route(config, json!({"status": "inactive"})).await;
        assert_eq!(out[NEXT_STEP_KEY], json!("inactive_step"));
    }

    #[tokio::test]
    async fn test_no_match_without_else_leaves_routing_alone() {
        let out = route(
            single("status", "equals", json!("active"), "active_step"),
            json!({"status": "pending"}),
        )
        .await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_numeric_and_contains_operators() {
        let out = route(single("count", "gt", json!(5), "gt_step"), json!({"count": 10})).await;
        assert_eq!(out[NEXT_STEP_KEY], json!("gt_step"));

        let out = route(single("count", "lte", json!("10"), "le_step"), json!({"count": 10})).await;
        assert_eq!(out[NEXT_STEP_KEY], json!("le_step"));

        let out = route(
            single("tags", "contains", json!("urgent"), "urgent_step"),
            json!({"tags": ["urgent", "important"]}),
        )
        .await;
        assert_eq!(out[NEXT_STEP_KEY], json!("urgent_step"));
    }

    #[test]
    fn test_evaluate_condition_edge_cases() {
        let inputs = json!({"word": "banana", "n": "abc"});
        let inputs = inputs.as_object().unwrap();
        let cond = |variable: &str, operator: Operator, value: Value| Condition {
            variable: variable.to_string(),
            operator,
            value,
        };

        assert!(evaluate_condition(&cond("word", Operator::Contains, json!("nan")), inputs));
        assert!(!evaluate_condition(&cond("missing", Operator::Equals, json!("x")), inputs));
        assert!(!evaluate_condition(&cond("missing", Operator::NotEquals, json!("x")), inputs));
        // Non-numeric operands compare as text
        assert!(evaluate_condition(&cond("n", Operator::Gt, json!("abb")), inputs));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = RouterConfig::from_value(&single("x", "approximately", json!(1), "s")).unwrap_err();
        assert!(matches!(err, ToolError::InvalidConfig(_)));
    }

    #[test]
    fn test_branch_targets() {
        let mut config = single("x", "equals", json!(1), "one");
        config["else_execute_step"] = json!("other");
        assert_eq!(
            ConditionalRouterFactory.branch_targets(&config),
            vec![StepId::new("one"), StepId::new("other")]
        );
        assert_eq!(ConditionalRouterFactory.loop_body_start(&config), None);
    }

    #[tokio::test]
    async fn test_loop_config_acts_as_loop_controller() {
        let config = json!({
            "loop_config": {
                "total_iterations_from": "num_items",
                "loop_body_start_id": "process_item_step",
                "counter_name": "my_loop_counter",
                "accumulators": {"all_item_data": "current_item_data"}
            },
            "else_execute_step": "loop_finished_step"
        });

        assert_eq!(
            ConditionalRouterFactory.branch_targets(&config),
            vec![StepId::new("process_item_step"), StepId::new("loop_finished_step")]
        );
        assert_eq!(
            ConditionalRouterFactory.loop_body_start(&config),
            Some(StepId::new("process_item_step"))
        );

        let step = StepId::new("router");
        let ctx = ToolContext {
            step_id: &step,
            declared_outputs: &[],
            llm: &NoLlm,
        };
        let mut tool = ConditionalRouterFactory.create(&config).unwrap();
        assert_eq!(tool.optional_inputs(), vec!["current_item_data".to_string()]);

        let first = tool
            .execute(json!({"num_items": 1}).as_object().unwrap(), &ctx)
            .await
            .unwrap();
        assert_eq!(first[NEXT_STEP_KEY], json!("process_item_step"));
        assert_eq!(first["my_loop_counter"], json!(0));

        let done = tool
            .execute(
                json!({"num_items": 1, "current_item_data": "item 0"}).as_object().unwrap(),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(done[NEXT_STEP_KEY], json!("loop_finished_step"));
        assert_eq!(done["all_item_data"], json!(["item 0"]));
    }

    #[test]
    fn test_loop_validation_checks_declared_outputs() {
        let agent: AgentSpec = serde_json::from_value(json!({
            "id": "router",
            "type": "ConditionalRouterTool",
            "inputs": {"num_items": "pipeline.initial_input", "current_item_data": "body.out"},
            "outputs": ["my_loop_counter"],
            "tool_config": {
                "loop_config": {
                    "total_iterations_from": "num_items",
                    "loop_body_start_id": "body",
                    "counter_name": "my_loop_counter",
                    "accumulators": {"all_item_data": "current_item_data"}
                }
            }
        }))
        .unwrap();

        let err = ConditionalRouterFactory.validate(&agent).unwrap_err();
        assert!(err.to_string().contains("all_item_data"));
    }
}
