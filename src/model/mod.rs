//! Core data models for the processing pipeline.
//!
//! Defines the primary entities: [`MediaFile`], [`Identifier`],
//! [`MetadataRecord`], [`ProcessingTask`] and the terminal [`Outcome`].
//!
//! # Lifetimes
//!
//! - `MediaFile` and `Identifier` are created per scan pass and dropped when
//!   their task completes.
//! - `MetadataRecord` outlives the run as the JSON sidecar next to the
//!   organized media.
//! - `Outcome` outlives the run as a ledger entry.

use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{ErrorKind, ScrapeError};

// ============================================================================
// Identifier
// ============================================================================

/// Normalized catalogue code such as `ABC-123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Normalize a raw code: trimmed, upper-cased, alphanumerics and hyphens only.
    ///
    /// Returns `None` for empty input or input containing other characters.
    pub fn new(raw: &str) -> Option<Self> {
        let code = raw.trim().to_uppercase();
        let valid = !code.is_empty()
            && !code.starts_with('-')
            && !code.ends_with('-')
            && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        valid.then_some(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a code reported by a source.
    pub fn matches(&self, other: &str) -> bool {
        Identifier::new(other).is_some_and(|o| o == *self)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::new(&value).ok_or_else(|| format!("invalid identifier: {value:?}"))
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

// ============================================================================
// MediaFile
// ============================================================================

/// A candidate media file discovered by the scanner.
///
/// Identity is the absolute path. The content hash is computed on first
/// access and cached for the lifetime of the value.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    /// Lower-case extension without the dot.
    pub extension: String,
    pub identifier: Option<Identifier>,
    pub discovered_at: DateTime<Utc>,
    hash: OnceLock<String>,
}

impl MediaFile {
    /// Stat `path` and build a `MediaFile` for it.
    pub fn from_path(path: &Path, identifier: Option<Identifier>) -> io::Result<Self> {
        let path = std::path::absolute(path)?;
        let size = std::fs::metadata(&path)?.len();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        Ok(Self {
            path,
            size,
            extension,
            identifier,
            discovered_at: Utc::now(),
            hash: OnceLock::new(),
        })
    }

    /// File name including extension.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without extension.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Streaming SHA-256 of the file contents, computed once.
    ///
    /// Blocking: call from `spawn_blocking` inside async code.
    pub fn content_hash(&self) -> io::Result<&str> {
        if let Some(hash) = self.hash.get() {
            return Ok(hash);
        }
        let computed = crate::duplicate::hash_file(&self.path)?;
        Ok(self.hash.get_or_init(|| computed))
    }

    /// The hash, if it has already been computed.
    pub fn cached_hash(&self) -> Option<&str> {
        self.hash.get().map(String::as_str)
    }
}

impl PartialEq for MediaFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for MediaFile {}

// ============================================================================
// MetadataRecord
// ============================================================================

/// Image URLs referenced by a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageUrls {
    pub cover: Option<String>,
    pub poster: Option<String>,
    pub screenshots: Vec<String>,
}

impl ImageUrls {
    pub fn is_empty(&self) -> bool {
        self.cover.is_none() && self.poster.is_none() && self.screenshots.is_empty()
    }
}

/// Structured metadata for one identifier, produced by one scraper call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(rename = "code")]
    pub identifier: Identifier,
    pub title: String,
    /// Ordered; the first entry is the primary contributor.
    #[serde(default, alias = "actresses")]
    pub contributors: Vec<String>,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    /// Runtime in minutes.
    #[serde(default, alias = "duration")]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub studio: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub genres: BTreeSet<String>,
    #[serde(default)]
    pub images: ImageUrls,
    /// Name of the scraper that produced this record.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub resolved_at: DateTime<Utc>,
}

impl MetadataRecord {
    /// Minimal record; remaining fields are filled with struct update syntax.
    pub fn new(
        identifier: Identifier,
        title: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            identifier,
            title: title.into(),
            contributors: Vec::new(),
            release_date: None,
            duration_minutes: None,
            studio: None,
            label: None,
            director: None,
            series: None,
            genres: BTreeSet::new(),
            images: ImageUrls::default(),
            source: source.into(),
            source_url: None,
            resolved_at: Utc::now(),
        }
    }

    pub fn primary_contributor(&self) -> Option<&str> {
        self.contributors.first().map(String::as_str)
    }

    pub fn year(&self) -> Option<i32> {
        self.release_date.map(|d| d.year())
    }

    /// Trim and de-duplicate list fields, dropping empty entries; order is kept.
    pub fn normalize(&mut self) {
        self.title = self.title.trim().to_string();
        self.contributors = normalize_list(std::mem::take(&mut self.contributors));
        self.images.screenshots = normalize_list(std::mem::take(&mut self.images.screenshots));
        self.genres = std::mem::take(&mut self.genres)
            .into_iter()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();
        for field in [
            &mut self.studio,
            &mut self.label,
            &mut self.director,
            &mut self.series,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
    }

    /// Check that a scraper returned a usable record for `requested`.
    pub fn validate(&self, requested: &Identifier) -> Result<(), ScrapeError> {
        if self.title.trim().is_empty() {
            return Err(ScrapeError::Parse(format!("record for {} has no title", requested)));
        }
        if self.identifier != *requested {
            return Err(ScrapeError::Parse(format!(
                "requested {} but source returned {}",
                requested, self.identifier
            )));
        }
        Ok(())
    }

    /// Merge another record into this one, preferring values already present.
    ///
    /// Scalars are only filled when missing; list fields are unioned.
    pub fn merge(&mut self, other: &MetadataRecord) {
        fill(&mut self.release_date, &other.release_date);
        fill(&mut self.duration_minutes, &other.duration_minutes);
        fill(&mut self.studio, &other.studio);
        fill(&mut self.label, &other.label);
        fill(&mut self.director, &other.director);
        fill(&mut self.series, &other.series);
        fill(&mut self.source_url, &other.source_url);
        fill(&mut self.images.cover, &other.images.cover);
        fill(&mut self.images.poster, &other.images.poster);

        for name in &other.contributors {
            if !self.contributors.contains(name) {
                self.contributors.push(name.clone());
            }
        }
        for url in &other.images.screenshots {
            if !self.images.screenshots.contains(url) {
                self.images.screenshots.push(url.clone());
            }
        }
        self.genres.extend(other.genres.iter().cloned());
    }
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(values.len());
    for value in values {
        let cleaned = value.trim();
        if !cleaned.is_empty() && !seen.iter().any(|s: &String| s == cleaned) {
            seen.push(cleaned.to_string());
        }
    }
    seen
}

fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(other);
    }
}

// ============================================================================
// Task lifecycle
// ============================================================================

/// Terminal result of one task, persisted in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Success,
    SkippedDuplicate,
    Failed,
    Unresolved,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [
        Outcome::Success,
        Outcome::SkippedDuplicate,
        Outcome::Failed,
        Outcome::Unresolved,
    ];

    /// Terminal outcomes are never re-enqueued on resume.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::SkippedDuplicate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::SkippedDuplicate => "skipped-duplicate",
            Outcome::Failed => "failed",
            Outcome::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-task state machine. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    Queued,
    Resolving,
    Organizing,
    FetchingAssets,
    Done(Outcome),
}

impl TaskState {
    fn rank(&self) -> u8 {
        match self {
            TaskState::Queued => 0,
            TaskState::Resolving => 1,
            TaskState::Organizing => 2,
            TaskState::FetchingAssets => 3,
            TaskState::Done(_) => 4,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TaskState::Done(_))
    }
}

/// One media file travelling through the pipeline.
#[derive(Debug)]
pub struct ProcessingTask {
    pub file: std::sync::Arc<MediaFile>,
    state: TaskState,
    /// Scraper attempts made while resolving.
    pub attempts: u32,
    pub last_error: Option<ErrorKind>,
}

impl ProcessingTask {
    pub fn new(file: std::sync::Arc<MediaFile>) -> Self {
        Self {
            file,
            state: TaskState::Queued,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Move to `next`. Backward moves and moves out of `Done` are refused.
    pub fn advance(&mut self, next: TaskState) -> bool {
        if self.state.is_done() || next.rank() <= self.state.rank() {
            tracing::warn!(
                target: "pipeline::task",
                from = ?self.state,
                to = ?next,
                "Refusing backward state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn record_attempts(&mut self, attempts: u32) {
        self.attempts = self.attempts.saturating_add(attempts);
    }

    /// The terminal outcome, if the task has finished.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.state {
            TaskState::Done(outcome) => Some(outcome),
            _ => None,
        }
    }
}
