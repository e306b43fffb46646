//! Content-hash duplicate detection.
//!
//! Files are hashed with streaming SHA-256 (fixed-size buffer, never the whole
//! file in memory). The [`DuplicateIndex`] maps each hash to the first path
//! that claimed it; the claim is a single insert-if-absent under one lock, so
//! workers racing on identical content see exactly one `New`.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::MediaFile;

const BUFFER_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 of a file's full contents.
///
/// # Returns
///
/// SHA256 hash as a lowercase hex string (64 characters)
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Result of checking one file against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    /// First file seen with this content.
    New,
    /// Same bytes were already claimed by another path.
    DuplicateOf(PathBuf),
}

/// Content hash -> first-seen path.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    entries: Mutex<HashMap<String, PathBuf>>,
}

impl DuplicateIndex {
    /// Atomically claim `hash` for `path`.
    ///
    /// Returns `None` if the claim succeeded, or the path that already holds it.
    /// Re-claiming with the same path is treated as success.
    pub fn claim(&self, hash: &str, path: &Path) -> Option<PathBuf> {
        let mut entries = self.entries.lock();
        match entries.entry(hash.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(path.to_path_buf());
                None
            }
            Entry::Occupied(existing) if existing.get() == path => None,
            Entry::Occupied(existing) => Some(existing.get().clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hashes files and checks them against a shared [`DuplicateIndex`].
#[derive(Debug, Clone, Default)]
pub struct DuplicateDetector {
    index: Arc<DuplicateIndex>,
}

impl DuplicateDetector {
    /// Pre-populate the index, e.g. with hashes organized by a previous run.
    pub fn seed(&self, hash: &str, path: &Path) {
        self.index.claim(hash, path);
    }

    /// Hash `file` (if not already cached) and claim its content.
    ///
    /// Blocking: call from `spawn_blocking` inside async code.
    pub fn check(&self, file: &MediaFile) -> io::Result<DuplicateCheck> {
        let hash = file.content_hash()?;
        Ok(match self.index.claim(hash, &file.path) {
            None => DuplicateCheck::New,
            Some(first) => {
                tracing::debug!(
                    target: "duplicate",
                    path = %file.path.display(),
                    first = %first.display(),
                    "Duplicate content"
                );
                DuplicateCheck::DuplicateOf(first)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_hash_file_small_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.mp4");

        let mut file = File::create(&file_path).unwrap();
        file.write_all(b"Hello, world!").unwrap();
        drop(file);

        let hash = hash_file(&file_path).unwrap();
        assert_eq!(hash.len(), 64); // SHA256 hex
        assert_eq!(
            hash,
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
        );
    }

    #[test]
    fn test_hash_spans_multiple_buffers() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");

        let mut content = vec![7u8; BUFFER_SIZE * 3 + 17];
        std::fs::write(&a, &content).unwrap();
        // Differ only in the final byte, past the first buffer
        *content.last_mut().unwrap() = 8;
        std::fs::write(&b, &content).unwrap();

        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn test_claim_is_insert_if_absent() {
        let index = DuplicateIndex::default();
        assert_eq!(index.claim("h1", Path::new("/a.mp4")), None);
        assert_eq!(index.claim("h1", Path::new("/a.mp4")), None);
        assert_eq!(
            index.claim("h1", Path::new("/b.mp4")),
            Some(PathBuf::from("/a.mp4"))
        );
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_detector_flags_identical_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("ABC-123.mp4");
        let b = dir.path().join("copy of ABC-123.mp4");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let detector = DuplicateDetector::default();
        let fa = MediaFile::from_path(&a, None).unwrap();
        let fb = MediaFile::from_path(&b, None).unwrap();

        assert_eq!(detector.check(&fa).unwrap(), DuplicateCheck::New);
        assert_eq!(
            detector.check(&fb).unwrap(),
            DuplicateCheck::DuplicateOf(fa.path.clone())
        );
    }

    #[test]
    fn test_concurrent_claims_yield_one_new() {
        let index = Arc::new(DuplicateIndex::default());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let index = index.clone();
                std::thread::spawn(move || {
                    index
                        .claim("same-hash", Path::new(&format!("/file-{i}.mp4")))
                        .is_none()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
