mod error;
mod settings;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use settings::{
    resolve_env, BrokerConfig, PostgresConfig, RelayConfig, ReplicationConfig, SubscriptionConfig,
};
pub use validation::{publish_budget, validate_config};
