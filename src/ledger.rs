//! Durable progress ledger.
//!
//! One JSON object per line, appended after each task finishes:
//!
//! ```json
//! {"path":"/in/SSIS-001.mp4","hash":"9f2c...","outcome":"success","resolved_path":"/lib/Yui Hatano/SSIS-001/SSIS-001.mp4","source":"javdb","timestamp":"2025-01-01T00:00:00Z"}
//! ```
//!
//! Entries are keyed by `(path, hash)`; on replay the latest entry per key
//! wins. Each append is a single `write_all` of a complete line followed by
//! `sync_data`, so a crash can leave at most one torn trailing line. Torn or
//! malformed lines are skipped with a warning when loading.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::classify::ErrorKind;
use crate::error::{Error, Result};
use crate::model::Outcome;

/// One task's terminal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub path: PathBuf,
    /// Content hash; empty when the file could not be read.
    #[serde(default)]
    pub hash: String,
    pub outcome: Outcome,
    /// Where the file ended up (target, `_unorganized/`, or the existing copy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<PathBuf>,
    /// Source that produced the metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEntry {
    pub fn new(path: impl Into<PathBuf>, hash: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            outcome,
            resolved_path: None,
            source: None,
            error_kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn key(&self) -> (PathBuf, String) {
        (self.path.clone(), self.hash.clone())
    }
}

/// Terminal entries from previous runs.
#[derive(Debug, Clone, Default)]
pub struct CompletedSet {
    keys: HashSet<(PathBuf, String)>,
    paths: HashSet<PathBuf>,
    /// `(hash, resolved path)` of prior successes, for seeding the duplicate index.
    successes: Vec<(String, PathBuf)>,
}

impl CompletedSet {
    fn from_latest(latest: HashMap<(PathBuf, String), ProgressEntry>) -> Self {
        let mut set = Self::default();
        for (key, entry) in latest {
            if !entry.outcome.is_terminal() {
                continue;
            }
            if entry.outcome == Outcome::Success && !entry.hash.is_empty() {
                let placed = entry.resolved_path.clone().unwrap_or_else(|| entry.path.clone());
                set.successes.push((entry.hash.clone(), placed));
            }
            set.paths.insert(key.0.clone());
            set.keys.insert(key);
        }
        set
    }

    /// Cheap pre-check: only paths seen here need hashing.
    pub fn contains_path(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn contains(&self, path: &Path, hash: &str) -> bool {
        self.keys.contains(&(path.to_path_buf(), hash.to_string()))
    }

    pub fn successes(&self) -> &[(String, PathBuf)] {
        &self.successes
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Append-only ledger file.
#[derive(Debug)]
pub struct ProgressLedger {
    path: PathBuf,
    file: Mutex<File>,
}

impl ProgressLedger {
    /// Open (creating if needed) the ledger for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::fs("create ledger directory", dir, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(|e| Error::fs("open ledger", &path, e))?;

        // Terminate a torn trailing line so the next entry starts clean
        if ends_mid_line(&mut file).map_err(|e| Error::fs("read ledger", &path, e))? {
            tracing::warn!(
                target: "ledger",
                path = %path.display(),
                "Ledger ends with a partial line"
            );
            file.write_all(b"\n")
                .and_then(|()| file.sync_data())
                .map_err(|e| Error::fs("append to ledger", &path, e))?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one entry and flush it to disk before returning.
    ///
    /// Blocking: call from `spawn_blocking` inside async code.
    pub fn record(&self, entry: &ProgressEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)
            .and_then(|()| file.sync_data())
            .map_err(|e| Error::fs("append to ledger", &self.path, e))?;

        tracing::trace!(
            target: "ledger",
            path = %entry.path.display(),
            outcome = %entry.outcome,
            "Recorded"
        );
        Ok(())
    }

    /// Latest entry per key. A missing file is an empty ledger.
    pub fn load_latest(path: &Path) -> Result<HashMap<(PathBuf, String), ProgressEntry>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(Error::fs("open ledger", path, e)),
        };

        let mut latest = HashMap::new();
        for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
            let line = line.map_err(|e| Error::fs("read ledger", path, e))?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<ProgressEntry>(&line) {
                Ok(entry) => {
                    latest.insert(entry.key(), entry);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "ledger",
                        path = %path.display(),
                        line = index + 1,
                        error = %e,
                        "Skipping malformed ledger line"
                    );
                }
            }
        }
        Ok(latest)
    }

    /// Keys whose latest outcome is terminal; read once at startup.
    pub fn load_completed(path: &Path) -> Result<CompletedSet> {
        let completed = CompletedSet::from_latest(Self::load_latest(path)?);
        tracing::info!(
            target: "ledger",
            path = %path.display(),
            completed = completed.len(),
            "Loaded ledger"
        );
        Ok(completed)
    }
}

fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Count entries per outcome (latest entry per key).
pub fn outcome_counts(
    entries: &HashMap<(PathBuf, String), ProgressEntry>,
) -> Vec<(Outcome, usize)> {
    Outcome::ALL
        .into_iter()
        .map(|outcome| {
            let count = entries.values().filter(|e| e.outcome == outcome).count();
            (outcome, count)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(path: &str, hash: &str, outcome: Outcome) -> ProgressEntry {
        ProgressEntry::new(path, hash, outcome)
    }

    #[test]
    fn test_record_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("progress.jsonl");
        let ledger = ProgressLedger::open(&path).unwrap();

        let mut ok = entry("/in/a.mp4", "h1", Outcome::Success);
        ok.resolved_path = Some("/lib/A/a.mp4".into());
        ok.source = Some("javdb".into());
        ledger.record(&ok).unwrap();
        ledger.record(&entry("/in/b.mp4", "h2", Outcome::Unresolved)).unwrap();

        let latest = ProgressLedger::load_latest(&path).unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[&(PathBuf::from("/in/a.mp4"), "h1".to_string())], ok);

        let completed = ProgressLedger::load_completed(&path).unwrap();
        assert!(completed.contains(Path::new("/in/a.mp4"), "h1"));
        assert!(!completed.contains(Path::new("/in/b.mp4"), "h2"));
        assert!(completed.contains_path(Path::new("/in/a.mp4")));
        assert_eq!(completed.successes(), &[("h1".to_string(), PathBuf::from("/lib/A/a.mp4"))]);
    }

    #[test]
    fn test_latest_entry_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.jsonl");
        let ledger = ProgressLedger::open(&path).unwrap();

        ledger.record(&entry("/in/a.mp4", "h1", Outcome::Failed)).unwrap();
        ledger.record(&entry("/in/a.mp4", "h1", Outcome::Success)).unwrap();
        ledger.record(&entry("/in/b.mp4", "h2", Outcome::SkippedDuplicate)).unwrap();
        ledger.record(&entry("/in/b.mp4", "h2", Outcome::Failed)).unwrap();

        let completed = ProgressLedger::load_completed(&path).unwrap();
        assert!(completed.contains(Path::new("/in/a.mp4"), "h1"));
        assert!(!completed.contains(Path::new("/in/b.mp4"), "h2"));
        assert_eq!(completed.len(), 1);
    }

    #[test]
    fn test_changed_content_is_a_new_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.jsonl");
        let ledger = ProgressLedger::open(&path).unwrap();
        ledger.record(&entry("/in/a.mp4", "old-hash", Outcome::Success)).unwrap();

        let completed = ProgressLedger::load_completed(&path).unwrap();
        assert!(completed.contains_path(Path::new("/in/a.mp4")));
        assert!(!completed.contains(Path::new("/in/a.mp4"), "new-hash"));
    }

    #[test]
    fn test_torn_and_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.jsonl");
        {
            let ledger = ProgressLedger::open(&path).unwrap();
            ledger.record(&entry("/in/a.mp4", "h1", Outcome::Success)).unwrap();
        }
        // Simulate a crash mid-append plus some garbage
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n{\"path\":\"/in/b.mp4\",\"hash\":\"h2\",\"outc").unwrap();
        drop(file);

        // Reopening terminates the torn line; new entries stay readable
        let ledger = ProgressLedger::open(&path).unwrap();
        ledger.record(&entry("/in/c.mp4", "h3", Outcome::Success)).unwrap();

        let latest = ProgressLedger::load_latest(&path).unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.contains_key(&(PathBuf::from("/in/c.mp4"), "h3".to_string())));
    }

    #[test]
    fn test_missing_ledger_is_empty() {
        let dir = tempdir().unwrap();
        let completed = ProgressLedger::load_completed(&dir.path().join("none.jsonl")).unwrap();
        assert!(completed.is_empty());
    }

    #[test]
    fn test_entry_format() {
        let mut e = entry("/in/a.mp4", "h1", Outcome::Unresolved);
        e.error_kind = Some(ErrorKind::Parse);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["outcome"], "unresolved");
        assert_eq!(json["error_kind"], "parse");
        assert!(json.get("resolved_path").is_none());
    }

    #[test]
    fn test_concurrent_appends_stay_whole() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.jsonl");
        let ledger = std::sync::Arc::new(ProgressLedger::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let e = entry(&format!("/in/{t}-{i}.mp4"), "h", Outcome::Success);
                        ledger.record(&e).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ProgressLedger::load_latest(&path).unwrap().len(), 200);
    }

    #[test]
    fn test_outcome_counts() {
        let mut latest = HashMap::new();
        for (p, o) in [("a", Outcome::Success), ("b", Outcome::Success), ("c", Outcome::Failed)] {
            let e = entry(p, "h", o);
            latest.insert(e.key(), e);
        }
        let counts = outcome_counts(&latest);
        assert_eq!(counts[0], (Outcome::Success, 2));
        assert_eq!(counts[2], (Outcome::Failed, 1));
        assert_eq!(counts[3], (Outcome::Unresolved, 0));
    }
}
