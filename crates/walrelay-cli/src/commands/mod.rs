mod check;
mod run;
mod status;

pub use check::cmd_check;
pub use run::cmd_run;
pub use status::cmd_status;

use anyhow::{Context, Result};
use tokio_postgres::Client;
use walrelay_config::RelayConfig;
use walrelay_pg::{connect_postgres, query_connection_string};

/// Open the ordinary (non-replication) session used for slot metadata.
async fn connect_metadata(config: &RelayConfig) -> Result<Client> {
    let connection_string = query_connection_string(&config.postgres_connection_string()?)?;
    connect_postgres(&connection_string, config.connect_timeout())
        .await
        .context("Failed to connect to Postgres")
}
