use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipewright_core::pipeline::{Pipeline, PipelineExecutor};
use pipewright_core::{EngineOptions, PipelineDefinition};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;
mod generate;
mod ollama;
mod output;

use config::{LlmSettings, Settings};
use generate::PipelineGenerator;
use ollama::OllamaClient;

#[derive(Parser, Debug)]
#[command(name = "pipewright")]
#[command(about = "Run declarative LLM and tool pipelines", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "pipewright.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a pipeline and print its final outputs
    Run {
        /// Pipeline definition (JSON)
        pipeline: PathBuf,

        /// Replace the definition's initial input (JSON, or plain text)
        #[arg(short, long)]
        input: Option<String>,

        /// Step execution ceiling for this run
        #[arg(long)]
        max_steps: Option<usize>,

        /// Model for LLM agents that do not name one
        #[arg(long)]
        model: Option<String>,

        /// Print outputs as a single JSON object
        #[arg(long)]
        json: bool,
    },

    /// Load and check a pipeline without running it
    Validate {
        /// Pipeline definition (JSON)
        pipeline: PathBuf,
    },

    /// Draft a pipeline definition from a plain-language description
    Generate {
        /// What the pipeline should do
        description: String,

        /// Directory the definition is written to
        #[arg(short, long, default_value = "pipelines")]
        output_dir: PathBuf,

        /// Model that drafts the definition
        #[arg(long)]
        model: Option<String>,

        /// Replace an existing definition with the same file name
        #[arg(long)]
        force: bool,
    },
}

fn build_pipeline(path: &Path, options: EngineOptions) -> Result<Pipeline> {
    let definition = PipelineDefinition::from_path(path)?;
    let registry = Arc::new(pipewright_tools::builtin_registry());
    Pipeline::build(definition, registry, options)
        .with_context(|| format!("Invalid pipeline {}", path.display()))
}

/// Inline JSON, or the raw text when it does not parse
fn parse_input(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run(
    settings: &Settings,
    path: &Path,
    input: Option<String>,
    max_steps: Option<usize>,
    model: Option<String>,
    json: bool,
) -> Result<()> {
    let mut options = settings.engine_options();
    if let Some(max_steps) = max_steps {
        options.max_steps = max_steps;
    }
    if let Some(model) = model {
        options.default_model = Some(model);
    }

    let pipeline = Arc::new(build_pipeline(path, options)?);
    let llm = Arc::new(OllamaClient::new(&settings.llm)?);
    tracing::info!("Using Ollama at {}", llm.chat_url());

    let executor = PipelineExecutor::new(pipeline.clone(), llm);
    let outcome = match input {
        Some(raw) => executor.run_with_input(parse_input(&raw)).await?,
        None => executor.run().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.outputs)?);
    } else {
        print!("{}", output::render_outputs(pipeline.name(), &outcome.outputs));
    }

    Ok(())
}

fn validate(settings: &Settings, path: &Path) -> Result<()> {
    let pipeline = build_pipeline(path, settings.engine_options())?;
    println!(
        "Pipeline '{}' is valid: {} agents, starts at '{}'",
        pipeline.name(),
        pipeline.definition().agents.len(),
        pipeline.definition().start_agent
    );
    Ok(())
}

async fn generate_pipeline(
    settings: &Settings,
    description: &str,
    output_dir: &Path,
    model: Option<String>,
    force: bool,
) -> Result<()> {
    // Drafting always runs at temperature 0
    let llm_settings = LlmSettings {
        temperature: 0.0,
        ..settings.llm.clone()
    };
    let llm = Arc::new(OllamaClient::new(&llm_settings)?);
    let model = model.unwrap_or_else(|| settings.llm.default_model.clone());
    tracing::info!("Drafting pipeline with {} at {}", model, llm.chat_url());

    let generator = PipelineGenerator::new(
        llm,
        model,
        Arc::new(pipewright_tools::builtin_registry()),
        settings.engine_options(),
    );
    let definition = generator.generate(description).await?;
    let path = generate::save(&definition, output_dir, force)?;

    println!("{}", serde_json::to_string_pretty(&definition)?);
    println!("\nSaved pipeline to {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipewright=info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    match cli.command {
        Command::Run {
            pipeline,
            input,
            max_steps,
            model,
            json,
        } => run(&settings, &pipeline, input, max_steps, model, json).await,
        Command::Validate { pipeline } => validate(&settings, &pipeline),
        Command::Generate {
            description,
            output_dir,
            model,
            force,
        } => generate_pipeline(&settings, &description, &output_dir, model, force).await,
    }
}
