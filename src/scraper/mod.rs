//! Pluggable metadata sources.
//!
//! Each source implements [`Scraper`]; the [`Registry`](registry::Registry)
//! orders them by configured priority and tracks their availability. How a
//! source turns a page or API response into a [`MetadataRecord`] is its own
//! business; callers only see `Result<MetadataRecord, ScrapeError>`.
//!
//! # Example
//!
//! ```ignore
//! use av_organizer::scraper::Scraper;
//!
//! async fn lookup(source: &dyn Scraper, id: &Identifier) {
//!     match source.resolve(id, None).await {
//!         Ok(record) => println!("{}", record.title),
//!         Err(e) => println!("{} failed: {e} ({})", source.name(), e.kind()),
//!     }
//! }
//! ```

pub mod auth;
pub mod http;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;

pub use auth::{AuthProvider, NoAuth, Session, StaticAuth};
pub use http::HttpScraper;
pub use registry::{Availability, Registry, ScraperDescriptor};

use crate::classify::ScrapeError;
use crate::config::Config;
use crate::model::{Identifier, MetadataRecord};

/// One metadata source.
///
/// Implement this trait to create mock implementations for testing.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Unique name, matched against `scraper_priority`.
    fn name(&self) -> &str;

    /// Resolve one identifier to one record.
    async fn resolve(
        &self,
        identifier: &Identifier,
        session: Option<&Session>,
    ) -> Result<MetadataRecord, ScrapeError>;

    /// Cheap reachability check, used by periodic availability refresh.
    async fn probe(&self) -> bool;
}

/// One [`HttpScraper`] per `[[sources]]` entry.
pub fn from_config(config: &Config) -> Result<Vec<Arc<dyn Scraper>>, ScrapeError> {
    let timeout = config.scraping.request_timeout();
    config
        .sources
        .iter()
        .map(|source| Ok(Arc::new(HttpScraper::new(source, timeout)?) as Arc<dyn Scraper>))
        .collect()
}
