// Run-scoped state store and dotted-path resolution

use crate::types::{StepId, INITIAL_INPUT_KEY};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Why a state path could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("step '{step}' has not executed (path '{path}')")]
    StepNotExecuted { path: String, step: String },

    #[error("step '{step}' did not produce output '{output}' (path '{path}')")]
    OutputNotProduced {
        path: String,
        step: String,
        output: String,
    },

    #[error("'{segment}' not found while resolving '{path}'")]
    MissingKey { path: String, segment: String },

    #[error("cannot index a non-structured value with '{segment}' while resolving '{path}'")]
    NotStructured { path: String, segment: String },

    #[error("malformed path '{path}'")]
    Malformed { path: String },
}

/// Flat mapping of everything a run has produced, keyed `"<step>.<output>"`,
/// plus the reserved `pipeline.initial_input` entry.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    entries: BTreeMap<String, Value>,
    executed: BTreeSet<StepId>,
}

impl StateStore {
    /// Create a store seeded with the pipeline's initial input
    pub fn new(initial_input: Value) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(INITIAL_INPUT_KEY.to_string(), initial_input);
        Self {
            entries,
            executed: BTreeSet::new(),
        }
    }

    /// Write an output; an existing value for the same key is replaced
    pub fn set(&mut self, step: &StepId, output: &str, value: Value) {
        self.executed.insert(step.clone());
        self.entries.insert(state_key(step, output), value);
    }

    /// Record that a step ran, even if it produced no outputs
    pub fn mark_executed(&mut self, step: &StepId) {
        self.executed.insert(step.clone());
    }

    pub fn has_executed(&self, step: &StepId) -> bool {
        self.executed.contains(step)
    }

    /// Look up a flat key exactly as stored
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries as a JSON object in key order
    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Resolve `pipeline.initial_input[.sub]*` or `<step>.<output>[.sub]*`
    pub fn resolve(&self, path: &str) -> Result<&Value, ResolutionError> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
            return Err(ResolutionError::Malformed {
                path: path.to_string(),
            });
        }

        let (head, output) = (segments[0], segments[1]);
        let key = format!("{}.{}", head, output);

        let root = if key == INITIAL_INPUT_KEY {
            self.entries.get(INITIAL_INPUT_KEY).unwrap_or(&Value::Null)
        } else if head == "pipeline" {
            return Err(ResolutionError::Malformed {
                path: path.to_string(),
            });
        } else {
            match self.entries.get(&key) {
                Some(value) => value,
                None if !self.has_executed(&StepId::new(head)) => {
                    return Err(ResolutionError::StepNotExecuted {
                        path: path.to_string(),
                        step: head.to_string(),
                    });
                }
                None => {
                    return Err(ResolutionError::OutputNotProduced {
                        path: path.to_string(),
                        step: head.to_string(),
                        output: output.to_string(),
                    });
                }
            }
        };

        segments[2..]
            .iter()
            .try_fold(root, |value, segment| descend(value, segment, path))
    }
}

fn descend<'a>(value: &'a Value, segment: &str, path: &str) -> Result<&'a Value, ResolutionError> {
    let missing = || ResolutionError::MissingKey {
        path: path.to_string(),
        segment: segment.to_string(),
    };

    match value {
        Value::Object(map) => map.get(segment).ok_or_else(missing),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|idx| items.get(idx))
            .ok_or_else(missing),
        _ => Err(ResolutionError::NotStructured {
            path: path.to_string(),
            segment: segment.to_string(),
        }),
    }
}

/// Flat state key for a step output
pub fn state_key(step: &StepId, output: &str) -> String {
    format!("{}.{}", step, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_nested() -> StateStore {
        let mut store = StateStore::new(json!({"topic": "mars", "tags": ["a", "b"]}));
        store.set(&StepId::new("agentA"), "outA", json!({"nested": {"val": 7}}));
        store
    }

    #[test]
    fn test_resolve_nested_value() {
        let store = store_with_nested();
        assert_eq!(store.resolve("agentA.outA.nested.val").unwrap(), &json!(7));
        assert_eq!(store.resolve("agentA.outA").unwrap(), &json!({"nested": {"val": 7}}));
    }

    #[test]
    fn test_resolve_missing_sub_key() {
        let store = store_with_nested();
        let err = store.resolve("agentA.outA.missing").unwrap_err();
        assert!(matches!(err, ResolutionError::MissingKey { ref segment, .. } if segment == "missing"));
    }

    #[test]
    fn test_resolve_initial_input() {
        let store = store_with_nested();
        assert_eq!(
            store.resolve("pipeline.initial_input").unwrap(),
            &json!({"topic": "mars", "tags": ["a", "b"]})
        );
        assert_eq!(store.resolve("pipeline.initial_input.topic").unwrap(), &json!("mars"));
        assert_eq!(store.resolve("pipeline.initial_input.tags.1").unwrap(), &json!("b"));
        assert!(store.resolve("pipeline.other").is_err());
    }

    #[test]
    fn test_resolve_unexecuted_and_unproduced() {
        let mut store = store_with_nested();
        assert!(matches!(
            store.resolve("agentB.out").unwrap_err(),
            ResolutionError::StepNotExecuted { .. }
        ));
        assert!(matches!(
            store.resolve("agentA.other").unwrap_err(),
            ResolutionError::OutputNotProduced { .. }
        ));

        store.mark_executed(&StepId::new("router"));
        assert!(matches!(
            store.resolve("router.anything").unwrap_err(),
            ResolutionError::OutputNotProduced { .. }
        ));
    }

    #[test]
    fn test_resolve_into_scalar_fails() {
        let mut store = StateStore::new(json!("plain text"));
        store.set(&StepId::new("count"), "n", json!(3));

        assert!(matches!(
            store.resolve("count.n.deeper").unwrap_err(),
            ResolutionError::NotStructured { .. }
        ));
        assert!(matches!(
            store.resolve("pipeline.initial_input.topic").unwrap_err(),
            ResolutionError::NotStructured { .. }
        ));
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = StateStore::new(Value::Null);
        let step = StepId::new("s");
        store.set(&step, "x", json!(1));
        store.set(&step, "x", json!(2));

        assert_eq!(store.get("s.x"), Some(&json!(2)));
        assert_eq!(store.len(), 2);
        assert_eq!(
            store.keys().collect::<Vec<_>>(),
            vec!["pipeline.initial_input", "s.x"]
        );
    }

    #[test]
    fn test_malformed_paths() {
        let store = StateStore::new(Value::Null);
        assert!(matches!(store.resolve("single").unwrap_err(), ResolutionError::Malformed { .. }));
        assert!(matches!(store.resolve("a..b").unwrap_err(), ResolutionError::Malformed { .. }));
    }
}
