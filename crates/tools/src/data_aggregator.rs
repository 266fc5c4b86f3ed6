// Collects selected inputs under new output names

use pipewright_core::tools::{Tool, ToolContext, ToolError, ToolFactory, ToolInputs, ToolOutputs};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const DATA_AGGREGATOR_TOOL: &str = "DataAggregatorTool";

#[derive(Debug, Clone, Default, Deserialize)]
struct DataAggregatorConfig {
    /// Output name to local input name
    #[serde(default)]
    sources: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct DataAggregatorTool {
    sources: BTreeMap<String, String>,
}

impl DataAggregatorTool {
    pub fn from_config(config: &Value) -> Result<Self, ToolError> {
        let config: DataAggregatorConfig = serde_json::from_value(config.clone())
            .map_err(|e| ToolError::InvalidConfig(format!("data aggregator config: {}", e)))?;
        Ok(Self {
            sources: config.sources,
        })
    }
}

#[async_trait::async_trait]
impl Tool for DataAggregatorTool {
    async fn execute(
        &mut self,
        inputs: &ToolInputs,
        _ctx: &ToolContext<'_>,
    ) -> Result<ToolOutputs, ToolError> {
        Ok(self
            .sources
            .iter()
            .map(|(key, source)| {
                let value = inputs.get(source).cloned().unwrap_or_else(|| {
                    json!(format!("Source key '{}' not found in inputs.", source))
                });
                (key.clone(), value)
            })
            .collect())
    }

    // A missing source is reported in the output rather than failing the step
    fn optional_inputs(&self) -> Vec<String> {
        self.sources.values().cloned().collect()
    }
}

#[derive(Debug, Default)]
pub struct DataAggregatorFactory;

impl ToolFactory for DataAggregatorFactory {
    fn name(&self) -> &str {
        DATA_AGGREGATOR_TOOL
    }

    fn create(&self, config: &Value) -> Result<Box<dyn Tool>, ToolError> {
        Ok(Box::new(DataAggregatorTool::from_config(config)?))
    }
}
