use std::sync::Arc;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use crate::catalog::Catalog;
use crate::config::Settings;
use crate::fleet::Fleet;

/// Counts reported by the final summary line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Done: {} updated, {} failed, {} skipped",
            self.updated, self.failed, self.skipped
        )
    }
}

/// Update every installed catalog service in place, one after another.
/// Individual failures are reported and counted, never fatal.
pub async fn run(settings: Settings) -> Result<()> {
    let client = crate::http::client();
    let catalog = Arc::new(Catalog::new(&settings, client.clone()));
    let fleet = Fleet::with_client(settings, catalog, client);
    let summary = update_all(&fleet).await?;
    println!("\n{summary}");
    Ok(())
}

pub async fn update_all(fleet: &Fleet) -> Result<Summary> {
    let services = fleet
        .catalog()
        .list()
        .await
        .context("failed to list services")?;

    let mut summary = Summary::default();
    for service in services {
        let name = service.name;
        if !fleet.is_installed(&name) {
            println!("{} {} (not installed)", "\u{2298}".dimmed(), name);
            summary.skipped += 1;
            continue;
        }

        println!("{} {}: checking...", "\u{2192}".cyan(), name);
        match fleet.update(&name, &|msg| println!("  {msg}")).await {
            Ok(()) => {
                println!("{} {}", "\u{2713}".green(), name);
                summary.updated += 1;
            }
            Err(e) => {
                println!("{} {}: {}", "\u{2717}".red(), name, e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
