use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod env;
mod runner;
mod shutdown;

use cli::{Cli, Commands, LogFormat};
use commands::{cmd_check, cmd_run, cmd_status};
use config::load_config;
use env::load_dotenv;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Before tracing starts, so RUST_LOG from the env file applies.
    let dotenv_path = load_dotenv(cli.env.as_deref())?;

    init_tracing(cli.log_format);
    if let Some(path) = dotenv_path {
        info!(path = %path.display(), "Loaded environment file");
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Status => cmd_status(config).await,
        Commands::Check => cmd_check(config).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("walrelay=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
