//! smolagents CLI.
//!
//! Commands:
//! - `run`: solve a task with the ReAct agent
//! - `health`: show circuit state (and optionally reachability) of each model

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use smolagents::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "smolagents",
    about = "Run a tool-calling ReAct agent against OpenAI-compatible or Ollama models",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file (SMOLAGENTS_* environment variables otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a task
    Run {
        /// The task to solve
        task: String,

        #[command(flatten)]
        models: ModelArgs,

        /// Override the maximum number of steps
        #[arg(long)]
        max_steps: Option<usize>,

        /// Print the full run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the health of the configured models
    Health {
        #[command(flatten)]
        models: ModelArgs,

        /// Call each model's health endpoint
        #[arg(long)]
        probe: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Provider {
    Openai,
    Ollama,
}

#[derive(Args)]
struct ModelArgs {
    #[arg(long, value_enum, default_value_t = Provider::Openai)]
    provider: Provider,

    /// Primary model id
    #[arg(short, long, default_value = "gpt-4o-mini")]
    model: String,

    /// Fallback model id, tried in order after the primary (repeatable)
    #[arg(long = "fallback")]
    fallbacks: Vec<String>,

    /// API base URL (or Ollama host)
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

impl ModelArgs {
    fn build(&self, model_id: &str) -> Result<Arc<dyn Model>> {
        let timeout = Some(Duration::from_secs(self.timeout_secs));
        let model: Arc<dyn Model> = match self.provider {
            Provider::Openai => {
                let mut config = OpenAIConfig {
                    timeout,
                    ..Default::default()
                };
                if let Some(key) = &self.api_key {
                    config.api_key = key.clone();
                }
                if let Some(url) = &self.base_url {
                    config.base_url = url.clone();
                }
                Arc::new(OpenAIServerModel::with_config(model_id, config)?)
            }
            Provider::Ollama => {
                let mut config = OllamaConfig {
                    timeout,
                    ..Default::default()
                };
                if let Some(host) = &self.base_url {
                    config.host = host.clone();
                }
                Arc::new(OllamaModel::with_config(model_id, config)?)
            }
        };
        Ok(model)
    }

    fn reliability(&self, config: &ReliabilityConfig) -> Result<ModelReliability> {
        let primary = self.build(&self.model)?;
        let fallbacks = self
            .fallbacks
            .iter()
            .map(|id| self.build(id))
            .collect::<Result<Vec<_>>>()?;
        Ok(ModelReliability::from_config(primary, fallbacks, config)?)
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::from_env().context("invalid SMOLAGENTS_* environment")?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(if cli.verbose { "debug" } else { "info" });
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            task,
            models,
            max_steps,
            json,
        } => {
            if let Some(max_steps) = max_steps {
                config.agent.max_steps = max_steps;
            }
            run(task, &models, config, json).await
        }
        Commands::Health { models, probe } => health(&models, &config, probe).await,
    }
}

async fn run(task: String, models: &ModelArgs, config: Config, json: bool) -> Result<()> {
    let reliability = models.reliability(&config.reliability)?;

    let mut builder = ReActLoop::builder(reliability).config(config.agent);
    match TokenCounter::cl100k() {
        Ok(counter) => builder = builder.token_counter(Arc::new(counter)),
        Err(e) => warn!(error = %e, "Token estimation unavailable"),
    }
    let mut agent = builder.build()?;

    let interrupt = agent.interrupt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt requested, stopping after the current step");
            interrupt.interrupt();
        }
    });

    let result = agent.run(task).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        match result.output_text() {
            Some(answer) => println!("{}", answer),
            None => println!(
                "No final answer ({:?}){}",
                result.outcome,
                result.error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default()
            ),
        }
        eprintln!(
            "{} step(s), {} tokens, {} ms",
            result.step_count(),
            result.token_usage.total(),
            result.duration_ms
        );
    }

    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn health(models: &ModelArgs, config: &Config, probe: bool) -> Result<()> {
    let reliability = models.reliability(&config.reliability)?;

    for entry in reliability.health_report(probe).await {
        let reachable = match entry.reachable {
            Some(true) => " reachable",
            Some(false) => " unreachable",
            None => "",
        };
        println!(
            "{:<30} {:<30} {:?}{}",
            entry.model_id, entry.service, entry.circuit, reachable
        );
    }
    Ok(())
}
