use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "walrelay")]
#[command(about = "Relay Postgres outbox changes to NATS JetStream")]
#[command(version)]
pub struct Cli {
    /// Environment to load (loads .env.{ENV} instead of .env)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    /// Path to walrelay.toml; when absent, settings come from the environment
    #[arg(short, long, global = true, default_value = "walrelay.toml")]
    pub config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream changes from the replication slot to the broker
    Run,

    /// Show replication slot and publication state
    Status,

    /// Verify the database is ready for logical replication
    Check,
}
