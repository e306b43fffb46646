//! Multi-source metadata resolution.
//!
//! The [`MetadataResolver`] turns one [`Identifier`] into at most one
//! [`MetadataRecord`] by driving the registry's sources with one of two
//! strategies:
//!
//! - **priority-fallback**: sources one at a time in priority order, stopping
//!   at the first success.
//! - **parallel-race**: every available source at once, keeping the
//!   highest-priority success (optionally merged with the others).
//!
//! Each call gets the configured timeout. Failures go through the
//! [`ErrorClassifier`]: network errors are retried with backoff on the same
//! source, parse errors fall through to the next source, and auth errors
//! disable the source for the rest of the run. Nothing here fails the task;
//! exhausting every source yields [`Resolution::Unresolved`].
//!
//! Outstanding calls are bounded per source by a semaphore; backoff sleeps
//! happen without holding a permit.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Semaphore;

use crate::classify::{Decision, ErrorClassifier, ErrorKind, ScrapeError};
use crate::config::{ResolutionStrategy, ScrapingConfig};
use crate::model::{Identifier, MetadataRecord};
use crate::scraper::{AuthProvider, Availability, Registry, ScraperDescriptor};

/// Resolver knobs, usually taken from [`ScrapingConfig`].
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub strategy: ResolutionStrategy,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Outstanding calls allowed per source.
    pub max_concurrent_requests: usize,
    /// Parallel-race only: fill gaps in the winner from other successes.
    pub merge_results: bool,
}

impl ResolverSettings {
    pub fn from_config(config: &ScrapingConfig) -> Self {
        Self {
            strategy: config.resolution_strategy,
            timeout: config.request_timeout(),
            max_concurrent_requests: config.max_concurrent_requests.max(1),
            merge_results: config.merge_results,
        }
    }
}

/// Result of resolving one identifier.
#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved {
        record: MetadataRecord,
        /// Source that produced the record (the primary one when merged).
        source: String,
        /// Scraper calls made across all sources.
        attempts: u32,
    },
    Unresolved {
        /// Kind of the last failure seen, if any source was tried.
        last_error: Option<ErrorKind>,
        attempts: u32,
    },
}

impl Resolution {
    pub fn attempts(&self) -> u32 {
        match self {
            Resolution::Resolved { attempts, .. } | Resolution::Unresolved { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// What one source produced after its retries.
struct SourceOutcome {
    rank: usize,
    name: String,
    result: Result<MetadataRecord, ErrorKind>,
    attempts: u32,
}

/// Drives scrapers for one identifier at a time; shared by all workers.
pub struct MetadataResolver {
    registry: Arc<Registry>,
    auth: Arc<dyn AuthProvider>,
    classifier: Arc<ErrorClassifier>,
    limits: HashMap<String, Arc<Semaphore>>,
    settings: ResolverSettings,
}

impl MetadataResolver {
    pub fn new(
        registry: Arc<Registry>,
        auth: Arc<dyn AuthProvider>,
        classifier: Arc<ErrorClassifier>,
        settings: ResolverSettings,
    ) -> Self {
        let permits = settings.max_concurrent_requests.max(1);
        let limits = registry
            .descriptors()
            .iter()
            .map(|d| (d.name().to_string(), Arc::new(Semaphore::new(permits))))
            .collect();
        Self {
            registry,
            auth,
            classifier,
            limits,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Resolve `identifier` with the configured strategy.
    pub async fn resolve(&self, identifier: &Identifier) -> Resolution {
        match self.settings.strategy {
            ResolutionStrategy::PriorityFallback => self.priority_fallback(identifier).await,
            ResolutionStrategy::ParallelRace => self.parallel_race(identifier).await,
        }
    }

    async fn priority_fallback(&self, identifier: &Identifier) -> Resolution {
        let mut attempts = 0;
        let mut last_error = None;

        for descriptor in self.registry.descriptors() {
            // Re-checked per source: another task may have disabled it meanwhile
            if !descriptor.is_available() {
                tracing::debug!(
                    target: "resolver",
                    source = descriptor.name(),
                    "Skipping unavailable source"
                );
                continue;
            }
            let outcome = self.query_source(descriptor, identifier).await;
            attempts += outcome.attempts;
            match outcome.result {
                Ok(record) => {
                    return Resolution::Resolved {
                        record,
                        source: outcome.name,
                        attempts,
                    };
                }
                Err(kind) => last_error = Some(kind),
            }
        }

        Resolution::Unresolved {
            last_error,
            attempts,
        }
    }

    async fn parallel_race(&self, identifier: &Identifier) -> Resolution {
        let available = self.registry.available();
        if available.is_empty() {
            return Resolution::Unresolved {
                last_error: None,
                attempts: 0,
            };
        }

        let mut pending: BTreeSet<usize> = available.iter().map(|d| d.rank).collect();
        let mut calls: FuturesUnordered<_> = available
            .iter()
            .map(|d| self.query_source(d, identifier))
            .collect();

        let deadline = tokio::time::Instant::now() + self.race_deadline();
        let mut outcomes: Vec<SourceOutcome> = Vec::with_capacity(available.len());

        loop {
            match tokio::time::timeout_at(deadline, calls.next()).await {
                Ok(Some(outcome)) => {
                    pending.remove(&outcome.rank);
                    outcomes.push(outcome);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        target: "resolver",
                        identifier = %identifier,
                        still_running = pending.len(),
                        "Race deadline reached"
                    );
                    break;
                }
            }

            if !self.settings.merge_results {
                // Nothing still running can beat the best success so far
                let best = outcomes.iter().filter(|o| o.result.is_ok()).map(|o| o.rank).min();
                if let Some(best) = best
                    && pending.iter().all(|rank| *rank > best)
                {
                    break;
                }
            }
        }
        drop(calls);

        let attempts = outcomes.iter().map(|o| o.attempts).sum();
        outcomes.sort_by_key(|o| o.rank);

        let last_error = outcomes.iter().rev().find_map(|o| o.result.as_ref().err().copied());
        let mut successes = outcomes
            .into_iter()
            .filter_map(|o| o.result.ok().map(|record| (o.name, record)));

        let Some((source, mut record)) = successes.next() else {
            return Resolution::Unresolved {
                last_error,
                attempts,
            };
        };
        if self.settings.merge_results {
            for (other, extra) in successes {
                tracing::debug!(
                    target: "resolver",
                    primary = %source,
                    other = %other,
                    "Merging result"
                );
                record.merge(&extra);
            }
        }

        Resolution::Resolved {
            record,
            source,
            attempts,
        }
    }

    /// Upper bound for one source's full retry sequence, plus a grace second.
    fn race_deadline(&self) -> Duration {
        let policy = self.classifier.policy();
        self.settings
            .timeout
            .saturating_mul(policy.max_attempts())
            .saturating_add(policy.max_delay.saturating_mul(policy.max_retries))
            .saturating_add(Duration::from_secs(1))
    }

    /// Call one source, retrying per the classifier.
    async fn query_source(
        &self,
        descriptor: &ScraperDescriptor,
        identifier: &Identifier,
    ) -> SourceOutcome {
        let name = descriptor.name().to_string();
        let session = self.auth.session(&name).await;
        let mut attempt: u32 = 0;
        let mut calls: u32 = 0;

        let result = loop {
            // Availability can change between retries
            match descriptor.availability() {
                Availability::Available => {}
                Availability::Unavailable => break Err(ErrorKind::Network),
                Availability::Disabled => break Err(ErrorKind::Auth),
            }
            calls += 1;

            let outcome = {
                let _permit = match self.limits.get(&name) {
                    Some(limit) => limit.acquire().await.ok(),
                    None => None,
                };
                match tokio::time::timeout(
                    self.settings.timeout,
                    descriptor.scraper.resolve(identifier, session.as_ref()),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ScrapeError::Timeout(self.settings.timeout)),
                }
            };

            let err = match outcome.and_then(|record| accept(record, identifier, &name)) {
                Ok(record) => {
                    tracing::debug!(
                        target: "resolver",
                        source = %name,
                        identifier = %identifier,
                        "Resolved"
                    );
                    break Ok(record);
                }
                Err(err) => err,
            };

            tracing::warn!(
                target: "resolver",
                source = %name,
                identifier = %identifier,
                attempt = attempt + 1,
                kind = %err.kind(),
                error = %err,
                "Source call failed"
            );

            match self.classifier.decide_scrape(&err, attempt) {
                Decision::Retry { after } => {
                    tokio::time::sleep(after).await;
                    attempt += 1;
                }
                Decision::DisableSource => {
                    self.registry.disable(&name);
                    break Err(err.kind());
                }
                _ => break Err(err.kind()),
            }
        };

        SourceOutcome {
            rank: descriptor.rank,
            name,
            result,
            attempts: calls,
        }
    }
}

/// Normalize and validate a record, stamping it with the registry name.
fn accept(
    mut record: MetadataRecord,
    identifier: &Identifier,
    source: &str,
) -> Result<MetadataRecord, ScrapeError> {
    record.normalize();
    record.validate(identifier)?;
    record.source = source.to_string();
    Ok(record)
}
