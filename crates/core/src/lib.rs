// Core engine for Pipewright declarative agent pipelines

pub mod error;
pub mod llm;
pub mod loop_controller;
pub mod pipeline;
pub mod state;
pub mod template;
pub mod tools;
pub mod types;

pub use error::{ErrorKind, PipelineError};
pub use types::*;
