use anyhow::{Context, Result};
use tracing::{info, warn};

use walrelay_bus::{JetStreamBroker, Publisher};
use walrelay_config::RelayConfig;
use walrelay_core::format_lsn;
use walrelay_pg::replication::wire::SlotCreation;
use walrelay_pg::{check_replication_setup, ConnectionParams, ReplicationSession};

use super::connect_metadata;
use crate::config::{publish_policy, session_options, stream_spec};
use crate::runner::StreamingLoop;
use crate::shutdown::listen_for_shutdown;

pub async fn cmd_run(config: RelayConfig) -> Result<()> {
    let identity = config.identity()?;
    info!(
        slot = %identity.slot_name,
        publication = %identity.publication_name,
        stream = %config.broker.stream,
        "Starting walrelay"
    );

    let shutdown = listen_for_shutdown()?;

    let broker = JetStreamBroker::connect(&config.broker_url()?, config.connect_timeout())
        .await
        .context("Failed to connect to NATS")?;
    let publisher = Publisher::new(
        broker,
        identity.clone(),
        config.broker.subject_prefix.clone(),
        publish_policy(&config.broker),
    );
    publisher
        .provision(&stream_spec(&config.broker))
        .await
        .context("Failed to provision JetStream stream")?;

    let metadata = connect_metadata(&config).await?;

    let status = check_replication_setup(&metadata, &identity, &config.subscription.output_plugin)
        .await
        .context("Failed to inspect replication setup")?;
    for problem in status.problems() {
        warn!(problem = %problem, "Replication setup problem");
    }

    let params = ConnectionParams::parse(&config.replication_connection_string()?)?;
    let session = ReplicationSession::new(identity, session_options(&config));
    let handle = session
        .open(&params, &metadata)
        .await
        .context("Failed to start replication")?;

    if let SlotCreation::Created { consistent_point } = handle.slot {
        info!(
            slot = %handle.identity.slot_name,
            consistent_point = %format_lsn(consistent_point),
            "Created replication slot"
        );
    }
    info!(
        system_id = %handle.system.system_id,
        timeline = handle.system.timeline,
        start = %format_lsn(handle.start.lsn()),
        resumed = handle.start.is_resume(),
        "Replication attached"
    );

    let mut streaming = StreamingLoop::new(
        handle.connection,
        publisher,
        handle.start.lsn(),
        config.status_interval(),
    );
    let result = streaming.run(shutdown).await;

    let summary = streaming.summary();
    info!(
        state = %summary.state,
        events = summary.stats.events_published,
        duplicates = summary.stats.duplicates,
        decode_failures = summary.stats.decode_failures,
        statuses = summary.stats.statuses_sent,
        applied = %format_lsn(summary.last_applied),
        acknowledged = %format_lsn(summary.last_acknowledged),
        "walrelay stopped"
    );
    result?;
    Ok(())
}
