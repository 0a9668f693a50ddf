use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use guru_pdf::DetectingExtractor;
use guru_session::SessionController;
use tracing_subscriber::EnvFilter;

mod repl;
mod settings;

use repl::Repl;
use settings::{AppSettings, SettingsStore};

#[derive(Debug, Parser)]
#[command(name = "guru")]
#[command(version, about = "Chat with local Ollama models from the terminal", long_about = None)]
struct Cli {
    /// Settings file to use instead of the per-user default
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Ollama base URL for this run
    #[arg(long, value_name = "URL")]
    ollama_url: Option<String>,
    /// Model to select at startup when the service lists it
    #[arg(long, value_name = "ID")]
    model: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, settings: &AppSettings) -> AppSettings {
        let mut settings = settings.clone();
        if let Some(url) = &self.ollama_url {
            settings.ollama_url = url.clone();
        }
        if let Some(model) = &self.model {
            settings.default_model = Some(model.clone());
        }
        settings.normalized()
    }
}

// Logs go to stderr so they never interleave with streamed replies.
fn init_tracing(log_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let store = match &cli.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    };
    let settings = cli.apply_overrides(&store.settings());
    init_tracing(&settings.log_filter);

    if let Some(error) = store.load_error() {
        tracing::warn!(
            path = %store.config_path().display(),
            error = %error,
            "failed to read settings; using defaults"
        );
    }

    let provider = match guru_llm::create_provider(settings.provider_config()) {
        Ok(provider) => provider,
        Err(error) => {
            eprintln!("guru: {error}");
            return ExitCode::FAILURE;
        }
    };

    let controller = SessionController::new(
        provider,
        Arc::new(DetectingExtractor::new()),
        settings.controller_config(),
    );

    let mut repl = Repl::new(controller, store, settings.ollama_url.as_str());
    match repl.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("guru: {error}");
            ExitCode::FAILURE
        }
    }
}
