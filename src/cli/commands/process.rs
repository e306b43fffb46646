//! Pipeline run command.

use std::io::Write;
use std::time::Duration;

use tokio::runtime::Runtime;

use super::build_pipeline;
use crate::config::Config;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Process every pending file; Ctrl-C requests a graceful shutdown.
pub fn cmd_process(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let pipeline = build_pipeline(config)?;
        let handle = pipeline.handle();

        println!(
            "Processing {} -> {}",
            config.library.source_directory.display(),
            config.library.target_directory.display()
        );

        let interrupt = {
            let handle = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nInterrupt received, finishing in-flight steps...");
                    handle.request_shutdown();
                }
            })
        };

        let progress = {
            let handle = handle.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let status = handle.status();
                    print!(
                        "\r{} done, {} in flight, {} queued",
                        status.done, status.in_flight, status.queued
                    );
                    let _ = std::io::stdout().flush();
                }
            })
        };

        let result = pipeline.run().await;
        interrupt.abort();
        progress.abort();

        let summary = result?;
        println!("\n{summary}");
        if handle.is_shutdown_requested() {
            println!("Stopped early; run again to continue where this run left off.");
        }
        Ok(())
    })
}
