use std::time::Duration;

use walrelay_core::envelope::{subject_matches, validate_subject};

use crate::error::{ConfigError, ConfigResult};
use crate::settings::{BrokerConfig, RelayConfig};

/// Validate a relay configuration before anything connects.
pub fn validate_config(config: &RelayConfig) -> ConfigResult<()> {
    validate_subscription(config)?;
    validate_timing(config)?;
    validate_subjects(&config.broker)?;
    Ok(())
}

fn validate_subscription(config: &RelayConfig) -> ConfigResult<()> {
    config.identity()?;

    if config.subscription.output_plugin != "pgoutput" {
        return Err(ConfigError::UnsupportedPlugin(
            config.subscription.output_plugin.clone(),
        ));
    }
    if !matches!(config.subscription.proto_version, 1 | 2) {
        return Err(ConfigError::InvalidProtoVersion(
            config.subscription.proto_version,
        ));
    }
    Ok(())
}

fn validate_timing(config: &RelayConfig) -> ConfigResult<()> {
    let non_zero = [
        ("replication.status_interval_ms", config.replication.status_interval_ms),
        ("replication.connect_timeout_ms", config.replication.connect_timeout_ms),
        ("broker.publish_timeout_ms", config.broker.publish_timeout_ms),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            return Err(ConfigError::ZeroDuration {
                field: field.to_string(),
            });
        }
    }

    // A publish that outlives the status interval starves keepalives.
    if config.broker.publish_timeout_ms >= config.replication.status_interval_ms {
        return Err(ConfigError::PublishTimeoutTooLong {
            publish_timeout_ms: config.broker.publish_timeout_ms,
            status_interval_ms: config.replication.status_interval_ms,
        });
    }
    Ok(())
}

fn validate_subjects(broker: &BrokerConfig) -> ConfigResult<()> {
    validate_subject(&broker.subject_prefix)?;

    let probe = format!("{}.probe", broker.subject_prefix);
    if !broker.subjects.iter().any(|s| subject_matches(s, &probe)) {
        return Err(ConfigError::UncoveredSubject {
            prefix: broker.subject_prefix.clone(),
            subjects: broker.subjects.clone(),
        });
    }
    Ok(())
}

/// Worst-case time one event can spend in the publisher: every attempt
/// timing out plus every backoff sleep.
pub fn publish_budget(broker: &BrokerConfig) -> Duration {
    let attempts = broker.max_retries.saturating_add(1);
    let mut total = broker
        .publish_timeout()
        .checked_mul(attempts)
        .unwrap_or(Duration::MAX);

    let ceiling = Duration::from_millis(broker.retry_max_delay_ms);
    for retry in 0..broker.max_retries {
        let delay = backoff_delay(broker, retry);
        if delay >= ceiling {
            // Every remaining sleep is capped at the ceiling.
            let remaining = broker.max_retries - retry;
            let tail = ceiling.checked_mul(remaining).unwrap_or(Duration::MAX);
            return total.saturating_add(tail);
        }
        total = total.saturating_add(delay);
    }
    total
}

fn backoff_delay(broker: &BrokerConfig, retry: u32) -> Duration {
    let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
    let delay = broker.retry_base_delay_ms.saturating_mul(factor);
    Duration::from_millis(delay.min(broker.retry_max_delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RelayConfig {
        RelayConfig::parse(
            r#"
[postgres]
connection_string = "postgres://localhost/app"

[broker]
url = "nats://localhost:4222"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_rejects_bad_slot_name() {
        let mut config = base_config();
        config.subscription.slot = "Outbox-Slot".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_other_plugins() {
        let mut config = base_config();
        config.subscription.output_plugin = "wal2json".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::UnsupportedPlugin(_))
        ));
    }

    #[test]
    fn test_rejects_proto_version() {
        let mut config = base_config();
        config.subscription.proto_version = 4;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidProtoVersion(4))
        ));
    }

    #[test]
    fn test_publish_timeout_must_undercut_status_interval() {
        let mut config = base_config();
        config.broker.publish_timeout_ms = 10_000;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::PublishTimeoutTooLong { .. })
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = base_config();
        config.replication.status_interval_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ZeroDuration { .. })
        ));
    }

    #[test]
    fn test_prefix_must_be_covered_by_stream() {
        let mut config = base_config();
        config.broker.subject_prefix = "events".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::UncoveredSubject { .. })
        ));

        config.broker.subjects.push("events.*".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_prefix_must_be_literal() {
        let mut config = base_config();
        config.broker.subject_prefix = "outbox.*".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_publish_budget() {
        let config = base_config();
        // 4 attempts x 2s + 100ms + 200ms + 400ms
        assert_eq!(publish_budget(&config.broker), Duration::from_millis(8_700));

        let mut capped = config.broker.clone();
        capped.max_retries = 5;
        capped.publish_timeout_ms = 100;
        // 6 x 100ms + 100 + 200 + 400 + 800 + 1000
        assert_eq!(publish_budget(&capped), Duration::from_millis(3_100));
    }

    #[test]
    fn test_publish_budget_saturates_on_extreme_retries() {
        let mut broker = base_config().broker;
        broker.max_retries = u32::MAX;
        broker.publish_timeout_ms = u64::MAX;
        assert_eq!(publish_budget(&broker), Duration::MAX);

        let mut slow = base_config().broker;
        slow.max_retries = u32::MAX;
        slow.publish_timeout_ms = 1;
        slow.retry_base_delay_ms = u64::MAX;
        slow.retry_max_delay_ms = u64::MAX;
        assert_eq!(publish_budget(&slow), Duration::MAX);
    }
}
