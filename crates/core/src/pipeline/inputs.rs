use crate::state::{ResolutionError, StateStore};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Where a step input comes from
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// Dotted state path resolved at execution time
    Path(String),
    /// Constant passed through unchanged
    Literal(Value),
}

/// One configured input of a step
#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    pub name: String,
    pub source: InputSource,
}

impl InputBinding {
    /// A string is a path when its head segment is `pipeline` or a declared
    /// step id; everything else is a literal.
    pub fn classify(name: &str, configured: &Value, step_ids: &HashSet<&str>) -> Self {
        let source = match configured {
            Value::String(s) if is_state_path(s, step_ids) => InputSource::Path(s.clone()),
            other => InputSource::Literal(other.clone()),
        };
        Self {
            name: name.to_string(),
            source,
        }
    }
}

fn is_state_path(text: &str, step_ids: &HashSet<&str>) -> bool {
    match text.split_once('.') {
        Some((head, rest)) => !rest.is_empty() && (head == "pipeline" || step_ids.contains(head)),
        None => false,
    }
}

/// Resolve bindings against the state. Paths named in `optional` that fail
/// to resolve are left out instead of failing.
pub fn resolve_inputs(
    bindings: &[InputBinding],
    state: &StateStore,
    optional: &[String],
) -> Result<Map<String, Value>, ResolutionError> {
    let mut resolved = Map::new();
    for binding in bindings {
        let value = match &binding.source {
            InputSource::Literal(value) => value.clone(),
            InputSource::Path(path) => match state.resolve(path) {
                Ok(value) => value.clone(),
                Err(_) if optional.contains(&binding.name) => continue,
                Err(e) => return Err(e),
            },
        };
        resolved.insert(binding.name.clone(), value);
    }
    Ok(resolved)
}
