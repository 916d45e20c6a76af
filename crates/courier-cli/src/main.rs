use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use courier::config::Settings;
use courier::context::SessionContext;
use courier::conversation::Conversation;
use courier::dispatcher::Dispatcher;
use courier::registry::{ModelRegistry, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod attachments;
mod prompt;
mod session;

use prompt::rustyline::RustylinePrompt;
use session::Session;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model id from the model list, e.g. openai/gpt-4o
    #[arg(short, long, required_unless_present = "list_models")]
    model: Option<String>,

    /// Model list read when LLM_CONFIG is not set
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Session name, used in logs and to keep agent threads
    #[arg(short, long)]
    session: Option<String>,

    /// Sampling temperature (models that accept one)
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Attach a file to the first message (repeatable)
    #[arg(short, long = "file")]
    files: Vec<PathBuf>,

    /// List the configured models and exit
    #[arg(long)]
    list_models: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with streamed replies
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let registry = ModelRegistry::from_env_or_file(&cli.config)
        .with_context(|| format!("Failed to load the model list from {}", cli.config.display()))?;

    if cli.list_models {
        for descriptor in registry.descriptors() {
            println!("{}  {}", style(&descriptor.id).bold(), style(&descriptor.description).dim());
        }
        return Ok(());
    }

    let model = cli.model.context("--model is required")?;
    let descriptor = registry
        .resolve(&model)
        .with_context(|| format!("Model {} is not configured (see --list-models)", model))?;

    let mut settings = Settings::default();
    if cli.temperature.is_some() {
        settings = settings.with_temperature(cli.temperature);
    }
    let dispatcher = Dispatcher::new(settings)?;

    let session_id = cli
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let user_id = std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string());
    let conversation = Conversation::new(
        SessionContext::new(session_id, user_id),
        descriptor,
        Arc::new(dispatcher),
    );

    let output_dir = std::env::current_dir().context("Failed to read the working directory")?;
    let mut session = Session::new(conversation, Box::new(RustylinePrompt::new()?), output_dir);
    for file in cli.files {
        session.attach(file);
    }

    session.start().await?;
    session.finish();
    Ok(())
}
