//! The processing pipeline.
//!
//! A feeder walks the source directory and pushes files into a bounded
//! `async-channel`; a fixed pool of workers pulls from it and drives one
//! file at a time through
//!
//! ```text
//! Queued -> Resolving -> Organizing -> FetchingAssets -> Done(outcome)
//! ```
//!
//! Every task ends with exactly one ledger entry and one `pipeline::task`
//! log line. Files already recorded with a terminal outcome for the same
//! content are never enqueued, which makes reruns idempotent and lets an
//! interrupted run resume where it stopped.
//!
//! Shutdown (see [`PipelineHandle::request_shutdown`]) stops dequeuing and
//! lets in-flight steps finish. A task that has not started organizing is
//! recorded as `failed` and its file is left where it was; a move that has
//! started is never interrupted.

pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub use status::{OutcomeCounts, Status, StatusTracker};

use crate::assets::{AssetFetcher, ImageDownloader};
use crate::classify::{Decision, ErrorClassifier, ErrorKind, FsOp};
use crate::config::Config;
use crate::duplicate::{DuplicateCheck, DuplicateDetector};
use crate::error::{Error, Result};
use crate::ledger::{CompletedSet, ProgressEntry, ProgressLedger};
use crate::model::{Identifier, MediaFile, Outcome, ProcessingTask, TaskState};
use crate::organizer::{OrganizePreview, Organizer, Placement};
use crate::resolver::{MetadataResolver, Resolution, ResolverSettings};
use crate::scanner::{self, ScanOptions};
use crate::scraper::{AuthProvider, Registry, Scraper};

/// Totals reported when a run ends.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub counts: OutcomeCounts,
    /// Files skipped because the ledger already holds a terminal entry.
    pub already_done: usize,
    /// Files queued but never started because of a shutdown.
    pub abandoned: usize,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Processed {} files in {:.1}s: {}",
            self.counts.total(),
            self.elapsed.as_secs_f64(),
            self.counts
        )?;
        if self.already_done > 0 {
            write!(f, " ({} already done)", self.already_done)?;
        }
        if self.interrupted {
            write!(f, " [interrupted, {} not started]", self.abandoned)?;
        }
        Ok(())
    }
}

/// Cheap handle for observing and stopping a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    status: Arc<StatusTracker>,
    cancel: CancellationToken,
}

impl PipelineHandle {
    pub fn status(&self) -> Status {
        self.status.snapshot()
    }

    /// Stop dequeuing; in-flight tasks finish their current step.
    pub fn request_shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(target: "pipeline", "Shutdown requested");
        }
        self.cancel.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What `plan` would do with one file.
#[derive(Debug, Clone)]
pub enum PlannedAction {
    /// The ledger already has a terminal entry for this content.
    AlreadyDone,
    /// Resolved; would be organized as previewed.
    Organize { preview: OrganizePreview, source: String },
    /// Would be moved to `_unorganized/`.
    Unorganized { reason: Option<ErrorKind> },
}

#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub path: PathBuf,
    pub identifier: Option<Identifier>,
    pub action: PlannedAction,
}

/// How one task ended, before it is written to the ledger.
struct TaskReport {
    outcome: Outcome,
    resolved_path: Option<PathBuf>,
    source: Option<String>,
    error_kind: Option<ErrorKind>,
    /// Set when the failure affects every task.
    fatal: Option<Error>,
}

impl TaskReport {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            resolved_path: None,
            source: None,
            error_kind: None,
            fatal: None,
        }
    }

    fn at(mut self, path: PathBuf) -> Self {
        self.resolved_path = Some(path);
        self
    }

    fn from_source(mut self, source: String) -> Self {
        self.source = Some(source);
        self
    }

    fn interrupted() -> Self {
        Self::new(Outcome::Failed)
    }
}

/// Scanner, resolver, organizer, asset fetcher and ledger wired together.
pub struct Pipeline {
    source_root: PathBuf,
    scan_options: ScanOptions,
    workers: usize,
    probe_interval: Duration,
    probe_timeout: Duration,
    resolver: Arc<MetadataResolver>,
    organizer: Arc<Organizer>,
    assets: Arc<AssetFetcher>,
    ledger: Arc<ProgressLedger>,
    completed: Arc<CompletedSet>,
    detector: DuplicateDetector,
    classifier: Arc<ErrorClassifier>,
    status: Arc<StatusTracker>,
    cancel: CancellationToken,
    /// First pipeline-fatal error; ends the run.
    fatal: Mutex<Option<Error>>,
}

impl Pipeline {
    /// Validate `config` and build every component.
    ///
    /// Reads the ledger once: completed entries are skipped by the feeder
    /// and prior successes seed the duplicate index.
    pub fn from_config(
        config: &Config,
        scrapers: Vec<Arc<dyn Scraper>>,
        auth: Arc<dyn AuthProvider>,
        downloader: Arc<dyn ImageDownloader>,
    ) -> Result<Self> {
        config.validate()?;

        let classifier = Arc::new(ErrorClassifier::new(config.scraping.retry_policy()));
        let registry = Arc::new(Registry::new(scrapers, &config.scraping.scraper_priority)?);
        let resolver = Arc::new(MetadataResolver::new(
            registry,
            auth,
            classifier.clone(),
            ResolverSettings::from_config(&config.scraping),
        ));
        let organizer = Arc::new(Organizer::from_config(config)?);
        organizer.check_writable().map_err(|e| {
            Error::validation(format!("target_directory is not writable: {e}"))
        })?;
        let assets = Arc::new(AssetFetcher::new(
            downloader,
            config.assets.max_concurrent_downloads,
            config.assets.download_images,
        ));

        let ledger_path = config.ledger_path();
        let completed = ProgressLedger::load_completed(&ledger_path)?;
        let ledger = Arc::new(ProgressLedger::open(&ledger_path)?);

        let detector = DuplicateDetector::default();
        for (hash, path) in completed.successes() {
            detector.seed(hash, path);
        }

        Ok(Self {
            source_root: config.library.source_directory.clone(),
            scan_options: ScanOptions::from_config(config)?,
            workers: config.pipeline.max_concurrent_files.max(1),
            probe_interval: Duration::from_secs(config.scraping.probe_interval_seconds.max(1)),
            probe_timeout: config.scraping.request_timeout(),
            resolver,
            organizer,
            assets,
            ledger,
            completed: Arc::new(completed),
            detector,
            classifier,
            status: Arc::new(StatusTracker::new()),
            cancel: CancellationToken::new(),
            fatal: Mutex::new(None),
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            status: self.status.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Process every pending file under the source directory.
    ///
    /// Returns `Err` only for pipeline-fatal conditions (full or read-only
    /// disk, unwritable ledger); everything else is a per-task outcome.
    pub async fn run(self) -> Result<RunSummary> {
        let started = Instant::now();
        let pipeline = Arc::new(self);

        let registry = pipeline.resolver.registry().clone();
        registry.probe_all(pipeline.probe_timeout).await;
        let stop_probes = pipeline.cancel.child_token();
        let probe_loop = registry.spawn_probe_loop(
            pipeline.probe_interval,
            pipeline.probe_timeout,
            stop_probes.clone(),
        );

        tracing::info!(
            target: "pipeline",
            source = %pipeline.source_root.display(),
            target_dir = %pipeline.organizer.target_root().display(),
            workers = pipeline.workers,
            "Starting run"
        );

        let (work_tx, work_rx) = async_channel::bounded::<Arc<MediaFile>>(pipeline.workers * 2);

        // Each worker gets its own cloned Receiver
        let handles: Vec<_> = (0..pipeline.workers)
            .map(|id| {
                let work_rx = work_rx.clone();
                let pipeline = pipeline.clone();
                tokio::spawn(async move { pipeline.worker(id, work_rx).await })
            })
            .collect();
        drop(work_rx);

        // work_tx is dropped when feeding ends, so workers drain and stop
        let already_done = pipeline.feed(work_tx).await;

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(target: "pipeline", error = %e, "Worker panicked");
            }
        }
        stop_probes.cancel();
        let _ = probe_loop.await;

        if let Some(err) = pipeline.fatal.lock().take() {
            return Err(err);
        }

        let status = pipeline.status.snapshot();
        let summary = RunSummary {
            counts: status.counts,
            already_done,
            abandoned: status.queued,
            interrupted: pipeline.cancel.is_cancelled(),
            elapsed: started.elapsed(),
        };
        tracing::info!(target: "pipeline", "{summary}");
        Ok(summary)
    }

    /// Dry run: resolve every pending file and report where it would go.
    pub async fn plan(&self) -> Vec<PlannedFile> {
        self.resolver.registry().probe_all(self.probe_timeout).await;

        let files = scanner::scan(self.source_root.clone(), self.scan_options.clone());
        let mut planned: Vec<PlannedFile> = files
            .map(|file| self.plan_one(Arc::new(file)))
            .buffer_unordered(self.workers)
            .collect()
            .await;
        planned.sort_by(|a, b| a.path.cmp(&b.path));
        planned
    }

    async fn plan_one(&self, file: Arc<MediaFile>) -> PlannedFile {
        let action = if self.already_done(&file).await {
            PlannedAction::AlreadyDone
        } else {
            match &file.identifier {
                None => PlannedAction::Unorganized { reason: None },
                Some(identifier) => match self.resolver.resolve(identifier).await {
                    Resolution::Resolved { record, source, .. } => PlannedAction::Organize {
                        preview: self.organizer.preview(&file, &record),
                        source,
                    },
                    Resolution::Unresolved { last_error, .. } => {
                        PlannedAction::Unorganized { reason: last_error }
                    }
                },
            }
        };
        PlannedFile {
            path: file.path.clone(),
            identifier: file.identifier.clone(),
            action,
        }
    }

    /// Push pending files to the workers; returns how many were skipped as done.
    async fn feed(&self, work_tx: async_channel::Sender<Arc<MediaFile>>) -> usize {
        let files = scanner::scan(self.source_root.clone(), self.scan_options.clone());
        let mut files = std::pin::pin!(files);
        let mut already_done = 0;

        loop {
            let file = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = files.next() => match next {
                    Some(file) => Arc::new(file),
                    None => break,
                },
            };

            if self.already_done(&file).await {
                tracing::debug!(
                    target: "pipeline",
                    path = %file.path.display(),
                    "Already done, skipping"
                );
                already_done += 1;
                continue;
            }

            self.status.enqueued();
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                sent = work_tx.send(file) => sent.is_ok(),
            };
            if !sent {
                break;
            }
        }
        already_done
    }

    /// Whether the ledger holds a terminal entry for this path and content.
    ///
    /// Only files whose path appears in the ledger are hashed here.
    async fn already_done(&self, file: &Arc<MediaFile>) -> bool {
        if !self.completed.contains_path(&file.path) {
            return false;
        }
        let hashing = file.clone();
        match run_blocking(move || hashing.content_hash().map(str::to_owned)).await {
            Ok(Ok(hash)) => self.completed.contains(&file.path, &hash),
            // Let the worker surface the read error
            _ => false,
        }
    }

    async fn worker(&self, id: usize, work_rx: async_channel::Receiver<Arc<MediaFile>>) {
        loop {
            let file = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = work_rx.recv() => match next {
                    Ok(file) => file,
                    Err(_) => break,
                },
            };

            self.status.started();
            if let Err(e) = self.process(file).await {
                tracing::error!(target: "pipeline", worker = id, error = %e, "Aborting pipeline");
                self.fatal.lock().get_or_insert(e);
                self.cancel.cancel();
                break;
            }
        }
        tracing::trace!(target: "pipeline", worker = id, "Worker stopped");
    }

    /// Run one task to completion and record it.
    async fn process(&self, file: Arc<MediaFile>) -> Result<()> {
        let mut task = ProcessingTask::new(file);
        let report = self.drive(&mut task).await;
        task.advance(TaskState::Done(report.outcome));
        self.complete(&task, report).await
    }

    async fn drive(&self, task: &mut ProcessingTask) -> TaskReport {
        let file = task.file.clone();

        let detector = self.detector.clone();
        let hashing = file.clone();
        let check = run_blocking(move || detector.check(&hashing))
            .await
            .and_then(|r| r.map_err(|e| Error::fs("read", &file.path, e)));
        match check {
            Ok(DuplicateCheck::New) => {}
            Ok(DuplicateCheck::DuplicateOf(first)) => {
                return TaskReport::new(Outcome::SkippedDuplicate).at(first);
            }
            Err(e) => {
                task.last_error = Some(e.kind());
                return self.fs_failure(&file, e, FsOp::ReadSource, false).await;
            }
        }

        if self.cancel.is_cancelled() {
            return TaskReport::interrupted();
        }
        task.advance(TaskState::Resolving);

        let resolution = match &file.identifier {
            Some(identifier) => self.resolver.resolve(identifier).await,
            None => {
                tracing::debug!(
                    target: "pipeline",
                    path = %file.path.display(),
                    "No identifier in file name"
                );
                Resolution::Unresolved {
                    last_error: None,
                    attempts: 0,
                }
            }
        };
        task.record_attempts(resolution.attempts());

        if self.cancel.is_cancelled() {
            return TaskReport::interrupted();
        }

        let (record, source) = match resolution {
            Resolution::Resolved { record, source, .. } => (record, source),
            Resolution::Unresolved { last_error, .. } => {
                task.last_error = last_error;
                let mut report = TaskReport::new(Outcome::Unresolved);
                report.error_kind = last_error;
                report.resolved_path = self.park(&file).await;
                return report;
            }
        };

        task.advance(TaskState::Organizing);
        let organizer = self.organizer.clone();
        let (moving, placing) = (file.clone(), record.clone());
        let placement = run_blocking(move || organizer.organize(&moving, &placing))
            .await
            .and_then(|r| r);
        let destination = match placement {
            Ok(Placement::Placed(destination)) => destination,
            Ok(Placement::SkippedExisting(existing)) => {
                return TaskReport::new(Outcome::SkippedDuplicate)
                    .at(existing)
                    .from_source(source);
            }
            Err(e) => {
                task.last_error = Some(e.kind());
                let op = self.write_failure_scope(&e).await;
                return self
                    .fs_failure(&file, e, op, true)
                    .await
                    .from_source(source);
            }
        };

        task.advance(TaskState::FetchingAssets);
        if self.cancel.is_cancelled() {
            tracing::debug!(
                target: "pipeline",
                path = %destination.display(),
                "Shutdown requested, skipping assets"
            );
        } else if self.assets.is_enabled()
            && let Some(dir) = destination.parent()
        {
            self.assets.fetch(&record, dir).await;
        }

        TaskReport::new(Outcome::Success)
            .at(destination)
            .from_source(source)
    }

    /// Classify a filesystem failure; park the file if asked and still possible.
    async fn fs_failure(
        &self,
        file: &Arc<MediaFile>,
        err: Error,
        op: FsOp,
        park: bool,
    ) -> TaskReport {
        let decision = match err.io_error() {
            Some(io) => self.classifier.decide_io(io, op),
            None => self.classifier.decide(err.kind(), 0),
        };

        let mut report = TaskReport::new(Outcome::Failed);
        report.error_kind = Some(err.kind());
        if park {
            report.resolved_path = self.park(file).await;
        }

        tracing::warn!(
            target: "pipeline",
            path = %file.path.display(),
            error = %err,
            ?decision,
            "Task failed"
        );
        if decision == Decision::AbortPipeline {
            report.fatal = Some(err);
        }
        report
    }

    /// `TargetRoot` when an I/O failure below the target comes from the root
    /// itself refusing writes, which every later task would hit too.
    async fn write_failure_scope(&self, err: &Error) -> FsOp {
        if err.io_error().is_none() {
            return FsOp::WriteTarget;
        }
        let organizer = self.organizer.clone();
        match run_blocking(move || organizer.check_writable()).await {
            Ok(Ok(())) => FsOp::WriteTarget,
            Ok(Err(root_err)) => {
                tracing::error!(
                    target: "pipeline",
                    error = %root_err,
                    "Target directory is not writable"
                );
                FsOp::TargetRoot
            }
            Err(_) => FsOp::WriteTarget,
        }
    }

    /// Move a file into `_unorganized/` unless it has already left the source.
    async fn park(&self, file: &Arc<MediaFile>) -> Option<PathBuf> {
        if !file.path.exists() {
            return None;
        }
        let organizer = self.organizer.clone();
        let parking = file.clone();
        match run_blocking(move || organizer.park_unorganized(&parking))
            .await
            .and_then(|r| r)
        {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(
                    target: "pipeline",
                    path = %file.path.display(),
                    error = %e,
                    "Failed to park file"
                );
                None
            }
        }
    }

    /// Log, count and persist the task's outcome.
    async fn complete(&self, task: &ProcessingTask, report: TaskReport) -> Result<()> {
        let file = &task.file;
        let outcome = report.outcome;
        let entry = ProgressEntry {
            path: file.path.clone(),
            hash: file.cached_hash().unwrap_or_default().to_string(),
            outcome,
            resolved_path: report.resolved_path.clone(),
            source: report.source.clone(),
            error_kind: report.error_kind,
            timestamp: chrono::Utc::now(),
        };

        tracing::info!(
            target: "pipeline::task",
            path = %file.path.display(),
            outcome = %outcome,
            error_kind = report.error_kind.map(|k| k.as_str()).unwrap_or("-"),
            source = report.source.as_deref().unwrap_or("-"),
            destination = %display_opt(report.resolved_path.as_deref()),
            attempts = task.attempts,
            "Task finished"
        );
        self.status.finished(outcome);

        let ledger = self.ledger.clone();
        let recorded = run_blocking(move || ledger.record(&entry))
            .await
            .and_then(|r| r);

        if let Some(fatal) = report.fatal {
            return Err(fatal);
        }
        // Without the ledger, resume guarantees are gone
        recorded
    }
}

fn display_opt(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Aborted(format!("blocking task failed: {e}")))
}
