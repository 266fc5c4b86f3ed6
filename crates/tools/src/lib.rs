// Built-in tools for Pipewright pipelines

pub mod conditional_router;
pub mod data_aggregator;
pub mod regex_parser;
pub mod structured_parser;

pub use conditional_router::{ConditionalRouterFactory, ConditionalRouterTool};
pub use data_aggregator::{DataAggregatorFactory, DataAggregatorTool};
pub use regex_parser::{RegexParserFactory, RegexParserTool};
pub use structured_parser::{StructuredDataParserFactory, StructuredDataParserTool};

use pipewright_core::loop_controller::LoopControllerFactory;
use pipewright_core::tools::ToolRegistry;
use std::sync::Arc;

/// Register every built-in tool, including the loop controller
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(LoopControllerFactory));
    registry.register(Arc::new(RegexParserFactory));
    registry.register(Arc::new(StructuredDataParserFactory));
    registry.register(Arc::new(ConditionalRouterFactory));
    registry.register(Arc::new(DataAggregatorFactory));
}

/// A registry holding only the built-in tools
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let registry = builtin_registry();
        assert_eq!(
            registry.names(),
            vec![
                "ConditionalRouterTool",
                "DataAggregatorTool",
                "LoopController",
                "RegexParserTool",
                "StructuredDataParserTool",
            ]
        );
    }
}
