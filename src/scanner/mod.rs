//! Directory scanning.
//!
//! [`scan`] walks the source tree on a blocking thread and yields
//! [`MediaFile`]s through a bounded channel, so discovery overlaps with
//! processing. Dropping the stream stops the walk. Calling `scan` again
//! starts a fresh walk.

pub mod identifier;

use futures::stream::Stream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use walkdir::{DirEntry, WalkDir};

pub use identifier::{IdentifierPatterns, clean_filename};

use crate::config::Config;
use crate::error::Error;
use crate::model::MediaFile;

/// Directory name that holds failed and unresolved files under the target.
pub const UNORGANIZED_DIR: &str = "_unorganized";

/// What to pick up during a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lower-case extensions without the dot.
    pub extensions: Vec<String>,
    pub patterns: Arc<IdentifierPatterns>,
    /// Directories never descended into (e.g. a target nested in the source).
    pub skip_dirs: Vec<PathBuf>,
}

impl ScanOptions {
    pub fn new(extensions: Vec<String>, patterns: Arc<IdentifierPatterns>) -> Self {
        Self {
            extensions,
            patterns,
            skip_dirs: Vec::new(),
        }
    }

    /// Extensions and patterns from `config`; never descends into the
    /// target or ledger directories.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let patterns = IdentifierPatterns::with_custom(&config.scraping.identifier_patterns)
            .map_err(|e| Error::validation(format!("invalid identifier pattern: {e}")))?;
        let mut options = Self::new(config.extensions(), Arc::new(patterns))
            .skip_dir(&config.library.target_directory);
        if let Some(dir) = config.ledger_path().parent() {
            options = options.skip_dir(dir);
        }
        Ok(options)
    }

    pub fn skip_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.skip_dirs.push(dir.into());
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
    }
}

/// Scans `root` recursively for media files matching `options`.
///
/// Files without a recognizable identifier are still emitted, with
/// `identifier` set to `None`.
pub fn scan(root: PathBuf, options: ScanOptions) -> impl Stream<Item = MediaFile> {
    let (tx, rx) = mpsc::channel(100);

    // Spawn a blocking task to perform the synchronous file system traversal
    tokio::task::spawn_blocking(move || {
        let skip: Vec<PathBuf> = options
            .skip_dirs
            .iter()
            .map(|d| d.canonicalize().unwrap_or_else(|_| d.clone()))
            .collect();

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !should_skip(entry, &skip));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(target: "scanner", error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !options.accepts(entry.path()) {
                continue;
            }

            let stem = entry
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let identifier = options.patterns.extract(&stem);

            let file = match MediaFile::from_path(entry.path(), identifier) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!(
                        target: "scanner",
                        path = %entry.path().display(),
                        error = %e,
                        "Cannot stat file"
                    );
                    continue;
                }
            };

            tracing::debug!(
                target: "scanner",
                path = %file.path.display(),
                identifier = ?file.identifier.as_ref().map(|i| i.as_str()),
                "Discovered"
            );

            // If the receiver is dropped, blocking_send will return an error, and we stop scanning.
            if tx.blocking_send(file).is_err() {
                break;
            }
        }
    });

    // Convert the mpsc Receiver into a Stream
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|file| (file, rx))
    })
}

/// Hidden entries, `_unorganized`, and explicitly skipped directories.
fn should_skip(entry: &DirEntry, skip: &[PathBuf]) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    if !entry.file_type().is_dir() {
        return false;
    }
    if name == UNORGANIZED_DIR {
        return true;
    }
    let path = entry
        .path()
        .canonicalize()
        .unwrap_or_else(|_| entry.path().to_path_buf());
    skip.iter().any(|s| *s == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::fs::File;
    use tempfile::tempdir;

    fn options() -> ScanOptions {
        ScanOptions::new(
            vec!["mp4".into(), "mkv".into()],
            Arc::new(IdentifierPatterns::default()),
        )
    }

    #[tokio::test]
    async fn test_scan_media_files() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        File::create(root.join("SSIS-001.mp4")).unwrap();
        File::create(root.join("notes.txt")).unwrap(); // Should be ignored
        File::create(root.join("cover.jpg")).unwrap(); // Should be ignored
        File::create(root.join("holiday.MKV")).unwrap(); // Found, no identifier

        let subdir = root.join("subdir");
        std::fs::create_dir(&subdir).unwrap();
        File::create(subdir.join("abc123.mp4")).unwrap();

        let files: Vec<MediaFile> = scan(root.to_path_buf(), options()).collect().await;
        assert_eq!(files.len(), 3);

        let by_name = |name: &str| files.iter().find(|f| f.file_name() == name).unwrap();
        assert_eq!(
            by_name("SSIS-001.mp4").identifier.as_ref().map(|i| i.as_str()),
            Some("SSIS-001")
        );
        assert_eq!(
            by_name("abc123.mp4").identifier.as_ref().map(|i| i.as_str()),
            Some("ABC-123")
        );
        let holiday = by_name("holiday.MKV");
        assert!(holiday.identifier.is_none());
        assert_eq!(holiday.extension, "mkv");
        assert!(holiday.path.is_absolute());
    }

    #[tokio::test]
    async fn test_scan_skips_hidden_unorganized_and_target() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        for sub in [".hidden", UNORGANIZED_DIR, "library", "keep"] {
            std::fs::create_dir(root.join(sub)).unwrap();
            File::create(root.join(sub).join("ABC-123.mp4")).unwrap();
        }
        File::create(root.join(".DEF-456.mp4")).unwrap();

        let files: Vec<MediaFile> =
            scan(root.to_path_buf(), options().skip_dir(root.join("library")))
                .collect()
                .await;

        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("keep/ABC-123.mp4"));
    }

    #[tokio::test]
    async fn test_scan_is_restartable() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("ABC-123.mp4")).unwrap();

        let first: Vec<MediaFile> = scan(dir.path().to_path_buf(), options()).collect().await;
        let second: Vec<MediaFile> = scan(dir.path().to_path_buf(), options()).collect().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_scan_missing_root_yields_nothing() {
        let dir = tempdir().unwrap();
        let files: Vec<MediaFile> =
            scan(dir.path().join("missing"), options()).collect().await;
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_options_from_config_skip_nested_target() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let mut config = Config::default();
        config.library.source_directory = root.to_path_buf();
        config.library.target_directory = root.join("library");
        config.library.supported_extensions = vec![".MP4".into()];

        std::fs::create_dir_all(root.join("library/A/ABC-123")).unwrap();
        File::create(root.join("library/A/ABC-123/ABC-123.mp4")).unwrap();
        File::create(root.join("SSIS-001.mp4")).unwrap();
        File::create(root.join("SSIS-002.mkv")).unwrap();

        let options = ScanOptions::from_config(&config).unwrap();
        assert_eq!(options.extensions, vec!["mp4".to_string()]);

        let files: Vec<MediaFile> = scan(root.to_path_buf(), options).collect().await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].identifier.as_ref().unwrap().as_str(), "SSIS-001");
    }
}
