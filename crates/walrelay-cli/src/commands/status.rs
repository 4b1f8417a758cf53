use anyhow::{Context, Result};
use colored::Colorize;

use walrelay_config::RelayConfig;
use walrelay_pg::replication::{publication_exists, publication_tables};
use walrelay_pg::slot_info;

use super::connect_metadata;

pub async fn cmd_status(config: RelayConfig) -> Result<()> {
    let identity = config.identity()?;
    let client = connect_metadata(&config).await?;

    println!("\n{}", "Replication Slot:".bold());
    match slot_info(&client, &identity.slot_name)
        .await
        .context("Failed to read slot state")?
    {
        Some(slot) => {
            let active = if slot.active {
                "active".green()
            } else {
                "inactive".yellow()
            };
            println!("  {:<22} {}", "name", slot.slot_name);
            println!("  {:<22} {}", "state", active);
            println!(
                "  {:<22} {}",
                "plugin",
                slot.plugin.as_deref().unwrap_or("-")
            );
            println!(
                "  {:<22} {}",
                "restart_lsn",
                slot.restart_lsn.as_deref().unwrap_or("-")
            );
            println!(
                "  {:<22} {}",
                "confirmed_flush_lsn",
                slot.confirmed_flush_lsn.as_deref().unwrap_or("-")
            );
            if let Some(bytes) = slot.retained_wal_bytes {
                println!("  {:<22} {}", "retained WAL", format_bytes(bytes));
            }
        }
        None => {
            println!(
                "  {}",
                format!(
                    "Slot '{}' does not exist yet. `walrelay run` creates it.",
                    identity.slot_name
                )
                .yellow()
            );
        }
    }

    println!("\n{}", "Publication:".bold());
    if publication_exists(&client, &identity.publication_name).await? {
        let tables = publication_tables(&client, &identity.publication_name).await?;
        println!("  {:<22} {}", "name", identity.publication_name);
        if tables.is_empty() {
            println!("  {}", "No tables published.".yellow());
        }
        for table in tables {
            println!("  {:<22} {}", "table", table);
        }
    } else {
        println!(
            "  {}",
            format!("Publication '{}' does not exist.", identity.publication_name).red()
        );
    }

    println!();
    Ok(())
}

fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
