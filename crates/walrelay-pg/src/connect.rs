//! Connection strings and the metadata (ordinary query) connection.

use std::sync::Arc;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use rustls::ClientConfig;
use tokio_postgres::Client;
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::debug;
use url::Url;

use crate::error::{PgError, PgResult};

const DEFAULT_PORT: u16 = 5432;

/// libpq `sslmode` values we understand.
///
/// `verify-ca` is treated like `verify-full` and `require` also verifies the
/// server certificate against the bundled web PKI roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> PgResult<Self> {
        match s {
            "disable" => Ok(SslMode::Disable),
            "allow" | "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(PgError::InvalidConnectionString(format!(
                "unknown sslmode '{}'",
                other
            ))),
        }
    }

    /// TLS must succeed for the connection to proceed.
    pub fn requires_tls(&self) -> bool {
        matches!(
            self,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull
        )
    }
}

/// Parsed connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: Option<String>,
    pub ssl_mode: SslMode,
    pub connect_timeout: Option<Duration>,
    pub application_name: Option<String>,
}

impl std::fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout", &self.connect_timeout)
            .field("application_name", &self.application_name)
            .finish()
    }
}

impl ConnectionParams {
    /// Parse a `postgres://` URL or a libpq key/value string.
    pub fn parse(connection_string: &str) -> PgResult<Self> {
        let trimmed = connection_string.trim();
        let pairs = if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            url_pairs(trimmed)?
        } else {
            keyword_pairs(trimmed)?
        };
        Self::from_pairs(pairs)
    }

    fn from_pairs(pairs: Vec<(String, String)>) -> PgResult<Self> {
        let mut params = ConnectionParams {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: None,
            database: None,
            ssl_mode: SslMode::default(),
            connect_timeout: None,
            application_name: None,
        };

        for (key, value) in pairs {
            match key.as_str() {
                "host" | "hostaddr" if !value.is_empty() => params.host = value,
                "port" if !value.is_empty() => {
                    params.port = value.parse().map_err(|_| {
                        PgError::InvalidConnectionString(format!("invalid port '{}'", value))
                    })?
                }
                "user" => params.user = value,
                "password" => params.password = Some(value),
                "dbname" if !value.is_empty() => params.database = Some(value),
                "sslmode" => params.ssl_mode = SslMode::parse(&value)?,
                "connect_timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        PgError::InvalidConnectionString(format!(
                            "invalid connect_timeout '{}'",
                            value
                        ))
                    })?;
                    params.connect_timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "application_name" => params.application_name = Some(value),
                "replication" => {}
                other => debug!(parameter = other, "Ignoring connection parameter"),
            }
        }

        if params.user.is_empty() {
            return Err(PgError::InvalidConnectionString(
                "no user specified".to_string(),
            ));
        }
        Ok(params)
    }

    /// Connection config for tokio-postgres (ordinary queries only).
    pub fn to_tokio_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config.host(&self.host).port(self.port).user(&self.user);
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(database) = &self.database {
            config.dbname(database);
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout(timeout);
        }
        if let Some(name) = &self.application_name {
            config.application_name(name);
        }
        config.ssl_mode(match self.ssl_mode {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
                tokio_postgres::config::SslMode::Require
            }
        });
        config
    }
}

fn url_pairs(s: &str) -> PgResult<Vec<(String, String)>> {
    let url = Url::parse(s).map_err(|e| PgError::InvalidConnectionString(e.to_string()))?;
    let decode = |v: &str| percent_decode_str(v).decode_utf8_lossy().into_owned();

    let mut pairs = Vec::new();
    if let Some(host) = url.host_str() {
        pairs.push(("host".to_string(), host.trim_matches(|c| c == '[' || c == ']').to_string()));
    }
    if let Some(port) = url.port() {
        pairs.push(("port".to_string(), port.to_string()));
    }
    if !url.username().is_empty() {
        pairs.push(("user".to_string(), decode(url.username())));
    }
    if let Some(password) = url.password() {
        pairs.push(("password".to_string(), decode(password)));
    }
    let database = url.path().trim_start_matches('/');
    if !database.is_empty() {
        pairs.push(("dbname".to_string(), decode(database)));
    }
    pairs.extend(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())));
    Ok(pairs)
}

/// Split `key=value key2='quoted value'` into pairs.
fn keyword_pairs(s: &str) -> PgResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(PgError::InvalidConnectionString(format!(
                "missing '=' after '{}'",
                key
            )));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\\') => {
                        if let Some(c) = chars.next() {
                            value.push(c);
                        }
                    }
                    Some('\'') => break,
                    Some(c) => value.push(c),
                    None => {
                        return Err(PgError::InvalidConnectionString(
                            "unterminated quoted value".to_string(),
                        ))
                    }
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                } else {
                    value.push(c);
                }
            }
        }
        pairs.push((key, value));
    }

    Ok(pairs)
}

/// Remove any `replication=` parameter so the string can carry ordinary queries.
pub fn query_connection_string(connection_string: &str) -> PgResult<String> {
    let trimmed = connection_string.trim();
    if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
        let mut url =
            Url::parse(trimmed).map_err(|e| PgError::InvalidConnectionString(e.to_string()))?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "replication")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
        Ok(url.to_string())
    } else {
        let kept: Vec<String> = keyword_pairs(trimmed)?
            .into_iter()
            .filter(|(k, _)| k != "replication")
            .map(|(k, v)| format!("{}='{}'", k, v.replace('\\', "\\\\").replace('\'', "\\'")))
            .collect();
        Ok(kept.join(" "))
    }
}

/// rustls client config trusting the web PKI roots.
pub(crate) fn tls_client_config() -> PgResult<ClientConfig> {
    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| PgError::Tls(format!("TLS config error: {}", e)))?
            .with_root_certificates(root_certs())
            .with_no_client_auth();
    Ok(config)
}

fn root_certs() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

/// Connect an ordinary query session, honouring sslmode.
///
/// Any `replication=` parameter is ignored. Spawns the connection task and
/// returns only the client.
pub async fn connect_postgres(connection_string: &str, connect_timeout: Duration) -> PgResult<Client> {
    let params = ConnectionParams::parse(connection_string)?;
    let mut config = params.to_tokio_config();
    if params.connect_timeout.is_none() {
        config.connect_timeout(connect_timeout);
    }

    if params.ssl_mode == SslMode::Disable {
        let (client, connection) = config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| PgError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });

        Ok(client)
    } else {
        let connector = MakeRustlsConnect::new(tls_client_config()?);

        let (client, connection) = config
            .connect(connector)
            .await
            .map_err(|e| PgError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "Postgres connection error");
            }
        });

        Ok(client)
    }
}
