//! Source listing command.

use futures::StreamExt;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::scanner::{self, ScanOptions};

/// List candidate files and the identifier extracted from each name
pub fn cmd_scan(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    let source = &config.library.source_directory;
    anyhow::ensure!(source.is_dir(), "{} is not a directory", source.display());
    let options = ScanOptions::from_config(config)?;

    rt.block_on(async {
        println!("Scanning directory: {}", source.display());

        let stream = scanner::scan(source.clone(), options);
        let mut stream = std::pin::pin!(stream);
        let (mut count, mut unidentified) = (0, 0);

        while let Some(file) = stream.next().await {
            count += 1;
            match &file.identifier {
                Some(id) => println!("{:<16} {}", id.as_str(), file.path.display()),
                None => {
                    unidentified += 1;
                    println!("{:<16} {}", "-", file.path.display());
                }
            }
        }

        println!(
            "\nScan complete. {} files, {} without an identifier.",
            count, unidentified
        );
    });
    Ok(())
}
