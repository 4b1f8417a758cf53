use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use walrelay_bus::{PublishPolicy, StreamSpec};
use walrelay_config::{publish_budget, validate_config, BrokerConfig, RelayConfig};
use walrelay_pg::SessionOptions;

/// Load and validate configuration.
///
/// Reads `path` when it exists; otherwise falls back to the process
/// environment (`DATABASE_URL`, `NATS_URL`, ...).
pub fn load_config(path: &Path) -> Result<RelayConfig> {
    let config = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = RelayConfig::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(path = %path.display(), "No config file, using environment");
        RelayConfig::from_environment(|name| std::env::var(name).ok())
            .context("Failed to build configuration from environment")?
    };

    validate_config(&config).context("Invalid configuration")?;

    let budget = publish_budget(&config.broker);
    if budget > config.status_interval() {
        warn!(
            publish_budget_ms = budget.as_millis() as u64,
            status_interval_ms = config.replication.status_interval_ms,
            "A fully retried publish can outlast the status interval; the server may time out the session"
        );
    }

    Ok(config)
}

pub fn publish_policy(broker: &BrokerConfig) -> PublishPolicy {
    PublishPolicy {
        timeout: broker.publish_timeout(),
        max_retries: broker.max_retries,
        base_delay: broker.retry_base_delay(),
        max_delay: broker.retry_max_delay(),
    }
}

pub fn stream_spec(broker: &BrokerConfig) -> StreamSpec {
    StreamSpec {
        name: broker.stream.clone(),
        subjects: broker.subjects.clone(),
        duplicate_window: broker.duplicate_window(),
    }
}

pub fn session_options(config: &RelayConfig) -> SessionOptions {
    SessionOptions {
        output_plugin: config.subscription.output_plugin.clone(),
        proto_version: config.subscription.proto_version,
        connect_timeout: config.connect_timeout(),
    }
}
