use std::time::Duration;

use serde::Deserialize;
use walrelay_core::SubscriptionIdentity;

use crate::error::{ConfigError, ConfigResult};

/// Relay configuration from walrelay.toml.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// Endpoint for ordinary queries (slot metadata, checks).
    pub connection_string: String,
    /// Endpoint for the replication stream; defaults to `connection_string`.
    #[serde(default)]
    pub replication_connection_string: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub slot: String,
    pub publication: String,
    pub output_plugin: String,
    pub proto_version: u32,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            slot: "outbox_slot".to_string(),
            publication: "outbox_pub".to_string(),
            output_plugin: "pgoutput".to_string(),
            proto_version: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// How often the applied position is reported upstream.
    pub status_interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: 10_000,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub url: String,
    #[serde(default = "default_stream")]
    pub stream: String,
    #[serde(default = "default_subjects")]
    pub subjects: Vec<String>,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Window in which the broker drops messages with a repeated id.
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: u64,
}

fn default_stream() -> String {
    "DOMAIN_EVENTS".to_string()
}

fn default_subjects() -> Vec<String> {
    vec!["outbox.>".to_string(), "DOMAIN_EVENTS.>".to_string()]
}

fn default_subject_prefix() -> String {
    "outbox".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    2_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    1_000
}

fn default_duplicate_window_secs() -> u64 {
    120
}

impl BrokerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: default_stream(),
            subjects: default_subjects(),
            subject_prefix: default_subject_prefix(),
            publish_timeout_ms: default_publish_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            duplicate_window_secs: default_duplicate_window_secs(),
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }
}

impl RelayConfig {
    pub fn parse(toml_str: &str) -> ConfigResult<Self> {
        let config: RelayConfig = toml::from_str(toml_str)?;
        Ok(config)
    }

    /// Configuration used when no walrelay.toml exists.
    ///
    /// Reads `DATABASE_URL`, `DATABASE_REPLICATION_URL` (optional) and
    /// `NATS_URL` through `lookup`; everything else takes its default.
    pub fn from_environment<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| ConfigError::MissingField {
                field: name.to_string(),
            })
        };

        Ok(Self {
            postgres: PostgresConfig {
                connection_string: required("DATABASE_URL")?,
                replication_connection_string: lookup("DATABASE_REPLICATION_URL"),
            },
            subscription: SubscriptionConfig::default(),
            replication: ReplicationConfig::default(),
            broker: BrokerConfig::new(required("NATS_URL")?),
        })
    }

    pub fn identity(&self) -> ConfigResult<SubscriptionIdentity> {
        Ok(SubscriptionIdentity::new(
            self.subscription.slot.clone(),
            self.subscription.publication.clone(),
        )?)
    }

    /// Resolved query (metadata) connection string.
    pub fn postgres_connection_string(&self) -> ConfigResult<String> {
        resolve_env(&self.postgres.connection_string, env_lookup)
    }

    /// Resolved replication connection string.
    pub fn replication_connection_string(&self) -> ConfigResult<String> {
        match &self.postgres.replication_connection_string {
            Some(s) => resolve_env(s, env_lookup),
            None => self.postgres_connection_string(),
        }
    }

    pub fn broker_url(&self) -> ConfigResult<String> {
        resolve_env(&self.broker.url, env_lookup)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.replication.status_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.replication.connect_timeout_ms)
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Expand `${VAR_NAME}` references in `s`.
///
/// An unset variable is an error rather than an empty string, so a missing
/// secret fails at startup instead of as an obscure connection error.
pub fn resolve_env<F>(s: &str, lookup: F) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedVariable)?;
        let name = &after[..end];
        let value = lookup(name).ok_or_else(|| ConfigError::MissingEnvVar {
            name: name.to_string(),
        })?;
        result.push_str(&value);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}
