use anyhow::{Context, Result};
use colored::Colorize;

use walrelay_bus::JetStreamBroker;
use walrelay_config::RelayConfig;
use walrelay_pg::check_replication_setup;
use walrelay_pg::replication::{PublicationStatus, SlotStatus};

use super::connect_metadata;

pub async fn cmd_check(config: RelayConfig) -> Result<()> {
    let identity = config.identity()?;
    let client = connect_metadata(&config).await?;
    println!("{} Connected to Postgres", "✓".green());

    let status = check_replication_setup(&client, &identity, &config.subscription.output_plugin)
        .await
        .context("Failed to inspect replication setup")?;

    if status.wal_level == "logical" {
        println!("{} wal_level = logical", "✓".green());
    }
    match &status.slot {
        SlotStatus::Ready(slot) => println!(
            "{} Slot '{}' exists ({})",
            "✓".green(),
            slot.slot_name,
            if slot.active { "active" } else { "inactive" }
        ),
        SlotStatus::Missing => println!(
            "{} Slot '{}' will be created on first run",
            "•".yellow(),
            identity.slot_name
        ),
        SlotStatus::WrongPlugin { .. } => {}
    }
    if let PublicationStatus::Exists { tables } = &status.publication {
        if !tables.is_empty() {
            println!(
                "{} Publication '{}' covers {} table(s)",
                "✓".green(),
                identity.publication_name,
                tables.len()
            );
        }
    }

    let broker_reachable =
        match JetStreamBroker::connect(&config.broker_url()?, config.connect_timeout()).await {
            Ok(_) => {
                println!("{} Connected to NATS", "✓".green());
                true
            }
            Err(e) => {
                println!("{} {}", "✗".red(), e);
                false
            }
        };

    let problems = status.problems();
    for problem in &problems {
        println!("{} {}", "✗".red(), problem);
    }
    if !problems.is_empty() {
        anyhow::bail!("Database is not ready for logical replication");
    }
    if !broker_reachable {
        anyhow::bail!("NATS is not reachable");
    }

    println!("\n{}", "Ready to stream.".green().bold());
    Ok(())
}
