// Rendering of final pipeline outputs for the terminal

use serde_json::{Map, Value};
use std::fmt::Write;

/// `num_chapters` -> `Num Chapters`
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => format!("  - {}", s),
                other => format!("  - {}", other),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(s) => format!("  {}", s),
        other => {
            let pretty = serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
            pretty
                .lines()
                .map(|line| format!("  {}", line))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

/// Human-readable report of the final outputs
pub fn render_outputs(pipeline_name: &str, outputs: &Map<String, Value>) -> String {
    let rule = "=".repeat(50);
    let mut out = String::new();

    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Final outputs: {}", pipeline_name);
    let _ = writeln!(out, "{}", rule);

    if outputs.is_empty() {
        let _ = writeln!(out, "\nThe pipeline produced no outputs.");
    }

    for (key, value) in outputs {
        let _ = writeln!(out, "\n{}:", title_case(key));
        let _ = writeln!(out, "{}", render_value(value));
    }

    let _ = writeln!(out, "\n{}", rule);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("full_story_content"), "Full Story Content");
        assert_eq!(title_case("writeChapters.text"), "Writechapters.text");
    }

    #[test]
    fn test_render_value_kinds() {
        assert_eq!(render_value(&json!(["one", 2])), "  - one\n  - 2");
        assert_eq!(render_value(&json!("story")), "  story");
        assert_eq!(render_value(&json!({"a": 1})), "  {\n    \"a\": 1\n  }");
    }

    #[test]
    fn test_render_outputs() {
        let outputs = json!({"title": "Red Dust", "chapters": ["a", "b"]});
        let text = render_outputs("story", outputs.as_object().unwrap());
        assert!(text.contains("Final outputs: story"));
        assert!(text.contains("\nTitle:\n  Red Dust\n"));
        assert!(text.contains("\nChapters:\n  - a\n  - b\n"));
    }
}
