//! Source registry: priority order and availability.
//!
//! Availability is refreshed by probes (at construction and on an interval),
//! never per call. An unavailable source is skipped without spending any of
//! its retry budget. A source disabled after an `Auth` failure stays disabled
//! for the rest of the run, whatever later probes say.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Scraper;
use crate::error::Error;

/// Availability of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// Last probe failed; may come back on the next refresh.
    Unavailable,
    /// Authentication failed; off for the rest of the run.
    Disabled,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Available => "available",
            Availability::Unavailable => "unavailable",
            Availability::Disabled => "disabled",
        }
    }
}

/// A registered source with its rank and current availability.
pub struct ScraperDescriptor {
    /// 0 is the highest priority.
    pub rank: usize,
    pub scraper: Arc<dyn Scraper>,
    availability: RwLock<Availability>,
}

impl ScraperDescriptor {
    pub fn name(&self) -> &str {
        self.scraper.name()
    }

    pub fn availability(&self) -> Availability {
        *self.availability.read()
    }

    pub fn is_available(&self) -> bool {
        self.availability() == Availability::Available
    }

    /// Apply a probe result. Disabled sources are left alone.
    fn set_probed(&self, reachable: bool) {
        let mut state = self.availability.write();
        if *state == Availability::Disabled {
            return;
        }
        let next = if reachable {
            Availability::Available
        } else {
            Availability::Unavailable
        };
        if *state != next {
            tracing::info!(
                target: "resolver",
                source = self.name(),
                availability = next.as_str(),
                "Source availability changed"
            );
        }
        *state = next;
    }
}

impl std::fmt::Debug for ScraperDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperDescriptor")
            .field("name", &self.name())
            .field("rank", &self.rank)
            .field("availability", &self.availability())
            .finish()
    }
}

/// Sources sorted by configured priority.
#[derive(Debug)]
pub struct Registry {
    descriptors: Vec<Arc<ScraperDescriptor>>,
}

impl Registry {
    /// Keep the scrapers named in `priority`, in that order.
    ///
    /// Every priority name must have a scraper; scrapers not listed are dropped.
    /// All sources start out available until the first probe says otherwise.
    pub fn new(scrapers: Vec<Arc<dyn Scraper>>, priority: &[String]) -> Result<Self, Error> {
        let mut descriptors = Vec::with_capacity(priority.len());
        for (rank, name) in priority.iter().enumerate() {
            if priority[..rank].contains(name) {
                return Err(Error::validation(format!(
                    "source {name:?} is listed twice in scraper_priority"
                )));
            }
            let scraper = scrapers
                .iter()
                .find(|s| s.name() == name)
                .cloned()
                .ok_or_else(|| {
                    Error::validation(format!(
                        "scraper_priority names {name:?} but no such source is configured"
                    ))
                })?;
            descriptors.push(Arc::new(ScraperDescriptor {
                rank,
                scraper,
                availability: RwLock::new(Availability::Available),
            }));
        }

        for scraper in &scrapers {
            if !priority.iter().any(|p| p == scraper.name()) {
                tracing::debug!(
                    target: "resolver",
                    source = scraper.name(),
                    "Source not in priority list, ignoring"
                );
            }
        }

        Ok(Self { descriptors })
    }

    /// All sources in priority order.
    pub fn descriptors(&self) -> &[Arc<ScraperDescriptor>] {
        &self.descriptors
    }

    /// Currently available sources in priority order.
    pub fn available(&self) -> Vec<Arc<ScraperDescriptor>> {
        self.descriptors
            .iter()
            .filter(|d| d.is_available())
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ScraperDescriptor>> {
        self.descriptors.iter().find(|d| d.name() == name)
    }

    /// Turn a source off for the rest of the run.
    pub fn disable(&self, name: &str) {
        if let Some(descriptor) = self.get(name) {
            let mut state = descriptor.availability.write();
            if *state != Availability::Disabled {
                tracing::warn!(target: "resolver", source = name, "Disabling source for this run");
                *state = Availability::Disabled;
            }
        }
    }

    /// Probe every source concurrently; a probe exceeding `timeout` counts as unreachable.
    pub async fn probe_all(&self, timeout: Duration) {
        let probes = self.descriptors.iter().map(|d| async move {
            let reachable = tokio::time::timeout(timeout, d.scraper.probe())
                .await
                .unwrap_or(false);
            d.set_probed(reachable);
        });
        futures::future::join_all(probes).await;
    }

    /// Re-probe every `interval` until `cancel` fires.
    pub fn spawn_probe_loop(
        self: Arc<Self>,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; construction already probed.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.probe_all(timeout).await,
                }
            }
        })
    }
}
