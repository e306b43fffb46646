//! Dry-run command.

use tokio::runtime::Runtime;

use super::build_pipeline;
use crate::config::Config;
use crate::pipeline::PlannedAction;

/// Resolve every pending file and print where it would go.
pub fn cmd_plan(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pipeline = build_pipeline(config)?;
        println!("\n[DRY RUN MODE - No files will be moved]\n");

        let planned = pipeline.plan().await;
        let (mut organize, mut unorganized, mut done) = (0, 0, 0);

        for file in &planned {
            match &file.action {
                PlannedAction::Organize { preview, source } => {
                    organize += 1;
                    let conflict = if preview.conflict { " [exists]" } else { "" };
                    println!(
                        "WOULD MOVE: {} -> {}{} (via {})",
                        file.path.display(),
                        preview.destination.display(),
                        conflict,
                        source
                    );
                }
                PlannedAction::Unorganized { reason } => {
                    unorganized += 1;
                    let reason = reason.map(|k| k.as_str()).unwrap_or("no identifier");
                    println!("UNORGANIZED: {} ({})", file.path.display(), reason);
                }
                PlannedAction::AlreadyDone => {
                    done += 1;
                }
            }
        }

        println!(
            "\n{} to organize, {} to _unorganized, {} already done",
            organize, unorganized, done
        );
        Ok(())
    })
}
