use thiserror::Error;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("missing required setting: {field}")]
    MissingField { field: String },

    #[error("environment variable '{name}' referenced by configuration is not set")]
    MissingEnvVar { name: String },

    #[error("unterminated '${{' in configuration value")]
    UnterminatedVariable,

    #[error(transparent)]
    Invalid(#[from] walrelay_core::Error),

    #[error("unsupported output plugin '{0}': only pgoutput is supported")]
    UnsupportedPlugin(String),

    #[error("proto_version must be 1 or 2, got {0}")]
    InvalidProtoVersion(u32),

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: String },

    #[error("subject prefix '{prefix}' is not covered by any stream subject {subjects:?}")]
    UncoveredSubject { prefix: String, subjects: Vec<String> },

    #[error(
        "publish_timeout_ms ({publish_timeout_ms}) must be shorter than status_interval_ms ({status_interval_ms})"
    )]
    PublishTimeoutTooLong {
        publish_timeout_ms: u64,
        status_interval_ms: u64,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
