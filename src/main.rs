//! av-organizer - resolve, rename and file media by catalogue code.
//!
//! Files in a source directory are matched to metadata records from
//! pluggable sources, moved into a templated library layout with a JSON
//! sidecar, and recorded in a progress ledger so reruns pick up where the
//! last one stopped.

pub mod assets;
pub mod classify;
pub mod cli;
pub mod config;
pub mod duplicate;
pub mod error;
pub mod ledger;
pub mod model;
pub mod organizer;
pub mod pipeline;
pub mod resolver;
pub mod scanner;
pub mod scraper;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("av_organizer=info".parse()?))
        .init();

    cli::run_command(&args)
}
