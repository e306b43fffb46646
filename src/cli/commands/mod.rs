//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `process`: run the pipeline
//! - `plan`: dry run printing planned destinations
//! - `scan`: list candidate files and their identifiers
//! - `stats`: outcome counts from the progress ledger
//! - `probe`: source availability
//! - `config`: create, show and validate the config file

mod config;
mod plan;
mod probe;
mod process;
mod scan;
mod stats;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;

pub use config::{cmd_config_init, cmd_config_show, cmd_config_validate};
pub use plan::cmd_plan;
pub use probe::cmd_probe;
pub use process::cmd_process;
pub use scan::cmd_scan;
pub use stats::cmd_stats;

use crate::assets::HttpImageDownloader;
use crate::config::{self as app_config, Config, ResolutionStrategy};
use crate::pipeline::Pipeline;
use crate::scraper::{self, StaticAuth};

/// Organize media files by catalogue code
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/av-organizer/config.toml)
    #[arg(long, global = true, env = "AV_ORGANIZER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the source directory
    #[arg(long, global = true, env = "AV_ORGANIZER_SOURCE")]
    pub source: Option<PathBuf>,

    /// Override the target directory
    #[arg(long, global = true, env = "AV_ORGANIZER_TARGET")]
    pub target: Option<PathBuf>,

    /// Override the resolution strategy
    #[arg(long, global = true, value_enum)]
    pub strategy: Option<ResolutionStrategy>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve, rename and move every pending file
    Process,
    /// Show where each pending file would go without touching anything
    Plan,
    /// List candidate files and the identifier found in each name
    Scan,
    /// Show outcome counts from the progress ledger
    Stats,
    /// Check which metadata sources are reachable
    Probe,
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write a starter config file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Check the configuration without processing anything
    Validate,
}

/// Run the selected CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;

    match &cli.command {
        Commands::Process => cmd_process(&rt, &load_config(cli)?),
        Commands::Plan => cmd_plan(&rt, &load_config(cli)?),
        Commands::Scan => cmd_scan(&rt, &load_config(cli)?),
        Commands::Stats => cmd_stats(&load_config(cli)?),
        Commands::Probe => cmd_probe(&rt, &load_config(cli)?),
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => cmd_config_init(&config_file(cli)?, *force),
            ConfigAction::Show => cmd_config_show(&load_config(cli)?),
            ConfigAction::Validate => cmd_config_validate(&load_config(cli)?),
        },
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// The config file in use: `--config`, or the default location.
pub(crate) fn config_file(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => app_config::config_path().context("Could not determine config directory"),
    }
}

/// Load the config file and apply command-line overrides.
///
/// An explicit `--config` must exist and parse; the default location falls
/// back to defaults.
pub(crate) fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => app_config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => app_config::load(),
    };
    apply_overrides(&mut config, cli);
    Ok(config)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(source) = &cli.source {
        config.library.source_directory = source.clone();
    }
    if let Some(target) = &cli.target {
        config.library.target_directory = target.clone();
    }
    if let Some(strategy) = cli.strategy {
        config.scraping.resolution_strategy = strategy;
    }
}

/// Build a pipeline backed by the configured HTTP sources.
pub(crate) fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let scrapers = scraper::from_config(config)?;
    let auth = Arc::new(StaticAuth::from_cookies(&config.credentials.cookies));
    let downloader = Arc::new(HttpImageDownloader::new(config.scraping.request_timeout())?);
    Ok(Pipeline::from_config(config, scrapers, auth, downloader)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::try_parse_from([
            "av-organizer",
            "--source",
            "/in",
            "--target",
            "/out",
            "--strategy",
            "parallel-race",
            "plan",
        ])
        .unwrap();
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.library.source_directory, PathBuf::from("/in"));
        assert_eq!(config.library.target_directory, PathBuf::from("/out"));
        assert_eq!(config.scraping.resolution_strategy, ResolutionStrategy::ParallelRace);
        assert!(matches!(cli.command, Commands::Plan));
    }

    #[test]
    fn test_config_subcommands_parse() {
        let cli = Cli::try_parse_from(["av-organizer", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let cli = Cli::try_parse_from([
            "av-organizer",
            "--config",
            missing.to_str().unwrap(),
            "stats",
        ])
        .unwrap();
        assert!(load_config(&cli).is_err());
    }
}
