//! Ledger statistics command.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::ledger::{self, ProgressLedger};

/// Print outcome counts (latest entry per file) from the progress ledger
pub fn cmd_stats(config: &Config) -> anyhow::Result<()> {
    let path = config.ledger_path();
    let latest = ProgressLedger::load_latest(&path)?;

    println!("Ledger: {}", path.display());
    if latest.is_empty() {
        println!("No entries yet.");
        return Ok(());
    }

    for (outcome, count) in ledger::outcome_counts(&latest) {
        println!("  {:<18} {}", outcome.as_str(), count);
    }
    println!("  {:<18} {}", "total", latest.len());

    let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in latest.values() {
        if let Some(kind) = entry.error_kind {
            *by_kind.entry(kind.as_str()).or_default() += 1;
        }
    }
    if !by_kind.is_empty() {
        println!("\nErrors by kind:");
        for (kind, count) in by_kind {
            println!("  {:<18} {}", kind, count);
        }
    }
    Ok(())
}
