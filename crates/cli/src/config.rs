use anyhow::{Context, Result};
use pipewright_core::EngineOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const OLLAMA_URL_ENV: &str = "PIPEWRIGHT_OLLAMA_URL";
pub const DEFAULT_MODEL_ENV: &str = "DEFAULT_LLM_MODEL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default)]
    pub temperature: f64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "phi4:latest".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_steps() -> usize {
    EngineOptions::default().max_steps
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            temperature: 0.0,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
        }
    }
}

impl Settings {
    /// Load settings from `path` if it exists, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings: Self = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::debug!("Configuration file {} not found, using defaults", path.display());
            Self::default()
        };

        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(OLLAMA_URL_ENV).filter(|v| !v.is_empty()) {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup(DEFAULT_MODEL_ENV).filter(|v| !v.is_empty()) {
            self.llm.default_model = model;
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_steps: self.engine.max_steps,
            default_model: Some(self.llm.default_model.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.engine.max_steps, 1000);
        assert_eq!(settings.llm.request_timeout_secs, 120);
        assert_eq!(settings.llm.temperature, 0.0);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmax_steps = 50\n\n[llm]\ntemperature = 0.2").unwrap();

        let settings: Settings =
            toml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(settings.engine.max_steps, 50);
        assert_eq!(settings.llm.temperature, 0.2);
        assert_eq!(settings.llm.base_url, "http://localhost:11434");
        assert_eq!(settings.llm.default_model, "phi4:latest");
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings.apply_overrides(|key| match key {
            OLLAMA_URL_ENV => Some("http://gpu-box:11434".to_string()),
            DEFAULT_MODEL_ENV => Some(String::new()),
            _ => None,
        });

        assert_eq!(settings.llm.base_url, "http://gpu-box:11434");
        assert_eq!(settings.llm.default_model, "phi4:latest");

        let options = settings.engine_options();
        assert_eq!(options.default_model.as_deref(), Some("phi4:latest"));
    }

    #[test]
    fn test_invalid_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nmax_steps = \"lots\"").unwrap();
        assert!(Settings::load(file.path()).is_err());
    }
}
