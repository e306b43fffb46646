//! Source availability command.

use tokio::runtime::Runtime;

use crate::config::Config;
use crate::scraper::{self, Registry};

/// Probe each configured source once and print its availability
pub fn cmd_probe(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    let scrapers = scraper::from_config(config)?;
    let registry = Registry::new(scrapers, &config.scraping.scraper_priority)?;

    rt.block_on(registry.probe_all(config.scraping.request_timeout()));

    for descriptor in registry.descriptors() {
        println!(
            "{:>2}. {:<16} {}",
            descriptor.rank + 1,
            descriptor.name(),
            descriptor.availability().as_str()
        );
    }
    Ok(())
}
