//! Configuration file commands.

use std::path::Path;

use crate::config::{self, Config, SourceConfig};
use crate::organizer::template::Template;
use crate::scraper::{self, Registry};

/// Starter config: defaults plus one JSON source per default priority entry.
fn starter_config() -> Config {
    let mut config = Config::default();
    config.sources = config
        .scraping
        .scraper_priority
        .iter()
        .map(|name| SourceConfig {
            name: name.clone(),
            url_template: format!("http://127.0.0.1:8080/{name}/{{code}}"),
            probe_url: None,
        })
        .collect();
    config
}

/// Write a starter config file
pub fn cmd_config_init(path: &Path, force: bool) -> anyhow::Result<()> {
    anyhow::ensure!(
        force || !path.exists(),
        "{} already exists (use --force to replace it)",
        path.display()
    );
    config::save(&starter_config(), path)?;
    println!("Wrote {}", path.display());
    println!("Set library.source_directory and library.target_directory before running.");
    Ok(())
}

/// Print the effective configuration as TOML
pub fn cmd_config_show(config: &Config) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Validate everything that can be checked offline
pub fn cmd_config_validate(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    let scrapers = scraper::from_config(config)?;
    Registry::new(scrapers, &config.scraping.scraper_priority)?;

    let template = Template::parse(&config.organize.naming_pattern)?;
    println!("Configuration OK");
    println!("  naming pattern: {template}");
    println!("  sources:        {}", config.scraping.scraper_priority.join(" > "));
    println!("  ledger:         {}", config.ledger_path().display());
    Ok(())
}
