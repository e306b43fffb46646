//! File organization and movement.
//!
//! Places resolved media under the target root using a naming [`Template`],
//! resolves conflicts with the configured [`ConflictPolicy`], and writes the
//! JSON sidecar next to the media once it has landed.
//!
//! # Features
//! - Template-based target layout (`{actress}/{code}/{code}.{ext}`)
//! - Safe mode: copy, verify size, then delete the source
//! - Cross-device fallback when a direct move fails
//! - `_unorganized/` parking for failed and unresolved files
//!
//! All operations here are blocking; the pipeline runs them on the blocking pool.

pub mod template;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

pub use template::{RenderContext, Template};

use crate::config::{Config, ConflictPolicy};
use crate::error::{Error, Result};
use crate::model::{MediaFile, MetadataRecord};
use crate::scanner::UNORGANIZED_DIR;

/// Scratch file used to check the target root accepts writes.
const WRITE_CHECK_FILE: &str = ".av-organizer-write-check";

/// Numbered names tried before falling back to a timestamp suffix.
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Where a file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Media (and sidecar) written at this path.
    Placed(PathBuf),
    /// Destination was taken and the policy is `skip`; source left untouched.
    SkippedExisting(PathBuf),
}

/// Preview result for dry-run
#[derive(Debug, Clone)]
pub struct OrganizePreview {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Destination already exists; the conflict policy will apply.
    pub conflict: bool,
}

/// Places media files under the target root.
#[derive(Debug)]
pub struct Organizer {
    target_root: PathBuf,
    template: Template,
    conflict: ConflictPolicy,
    safe_mode: bool,
    /// Destinations claimed by in-flight transfers, so two workers never pick the same name.
    reserved: Mutex<HashSet<PathBuf>>,
}

impl Organizer {
    pub fn new(
        target_root: impl Into<PathBuf>,
        template: Template,
        conflict: ConflictPolicy,
        safe_mode: bool,
    ) -> Self {
        Self {
            target_root: target_root.into(),
            template,
            conflict,
            safe_mode,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let template = Template::parse(&config.organize.naming_pattern)?;
        Ok(Self::new(
            &config.library.target_directory,
            template,
            config.organize.conflict_resolution,
            config.organize.safe_mode,
        ))
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    pub fn unorganized_dir(&self) -> PathBuf {
        self.target_root.join(UNORGANIZED_DIR)
    }

    /// Destination before conflict resolution.
    pub fn destination(&self, file: &MediaFile, record: &MetadataRecord) -> PathBuf {
        let stem = file.stem();
        let relative = self.template.render(&RenderContext {
            record,
            original_name: &stem,
            ext: &file.extension,
        });
        self.target_root.join(relative)
    }

    /// Generates a preview of what organize would do (dry-run)
    pub fn preview(&self, file: &MediaFile, record: &MetadataRecord) -> OrganizePreview {
        let destination = self.destination(file, record);
        OrganizePreview {
            source: file.path.clone(),
            conflict: destination.exists(),
            destination,
        }
    }

    /// Move `file` to its templated destination and write the sidecar.
    pub fn organize(&self, file: &MediaFile, record: &MetadataRecord) -> Result<Placement> {
        let wanted = self.destination(file, record);
        create_parent(&wanted)?;

        let Some(destination) = self.reserve(&wanted, self.conflict, true) else {
            tracing::info!(
                target: "organizer",
                path = %file.path.display(),
                existing = %wanted.display(),
                "Destination exists, skipping"
            );
            return Ok(Placement::SkippedExisting(wanted));
        };

        let result = self
            .transfer(&file.path, &destination)
            .and_then(|()| write_sidecar(&destination, record));
        self.release(&destination);
        result?;

        tracing::debug!(
            target: "organizer",
            from = %file.path.display(),
            to = %destination.display(),
            safe_mode = self.safe_mode,
            "Organized"
        );
        Ok(Placement::Placed(destination))
    }

    /// Move a file that could not be organized into `_unorganized/`.
    ///
    /// Name conflicts there are always resolved by renaming.
    pub fn park_unorganized(&self, file: &MediaFile) -> Result<PathBuf> {
        let wanted = self.unorganized_dir().join(file.file_name());
        create_parent(&wanted)?;

        // Rename never declines a reservation
        let destination = self
            .reserve(&wanted, ConflictPolicy::Rename, false)
            .unwrap_or(wanted);
        let result = self.transfer(&file.path, &destination);
        self.release(&destination);
        result?;

        tracing::debug!(
            target: "organizer",
            from = %file.path.display(),
            to = %destination.display(),
            "Parked"
        );
        Ok(destination)
    }

    /// Pick the final destination under `policy`, or `None` to skip.
    ///
    /// With `sidecar`, a name is also taken when its sidecar is, so media
    /// files differing only by extension never share one.
    fn reserve(&self, wanted: &Path, policy: ConflictPolicy, sidecar: bool) -> Option<PathBuf> {
        let mut reserved = self.reserved.lock();
        let media_taken = |p: &Path| p.exists() || reserved.contains(p);
        let sidecar_taken = |p: &Path| {
            let json = sidecar_path(p);
            sidecar && (json.exists() || reserved.iter().any(|r| sidecar_path(r) == json))
        };
        let taken = |p: &Path| media_taken(p) || sidecar_taken(p);

        let chosen = match policy {
            ConflictPolicy::Rename if taken(wanted) => unique_path(wanted, &taken),
            ConflictPolicy::Skip if taken(wanted) => return None,
            // Overwrite replaces same-named media only, never another file's sidecar
            ConflictPolicy::Overwrite if !media_taken(wanted) && sidecar_taken(wanted) => {
                unique_path(wanted, &taken)
            }
            _ => wanted.to_path_buf(),
        };
        reserved.insert(chosen.clone());
        Some(chosen)
    }

    /// Create the target root if needed and check a file can be written there.
    pub fn check_writable(&self) -> Result<()> {
        let root = &self.target_root;
        fs::create_dir_all(root).map_err(|e| Error::fs("create target directory", root, e))?;
        let marker = root.join(WRITE_CHECK_FILE);
        fs::write(&marker, b"").map_err(|e| Error::fs("write to", root, e))?;
        fs::remove_file(&marker).map_err(|e| Error::fs("remove write check in", root, e))?;
        Ok(())
    }

    fn release(&self, path: &Path) {
        self.reserved.lock().remove(path);
    }

    /// Move or copy `source` to `destination`.
    fn transfer(&self, source: &Path, destination: &Path) -> Result<()> {
        if self.safe_mode {
            return copy_verify_delete(source, destination);
        }

        if let Err(e) = fs::rename(source, destination) {
            // If rename fails (cross-device), try copy + delete
            tracing::debug!(
                target: "organizer",
                error = %e,
                "Rename failed, falling back to copy"
            );
            copy_verify_delete(source, destination)?;
        }
        Ok(())
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::fs("create directory", parent, e))?;
    }
    Ok(())
}

/// Copy, check the size matches, then remove the source.
///
/// A mismatched copy is removed again and the source is kept.
fn copy_verify_delete(source: &Path, destination: &Path) -> Result<()> {
    let expected = fs::metadata(source)
        .map_err(|e| Error::fs("read", source, e))?
        .len();
    fs::copy(source, destination).map_err(|e| Error::fs("copy to", destination, e))?;

    let actual = fs::metadata(destination)
        .map_err(|e| Error::fs("verify", destination, e))?
        .len();
    if actual != expected {
        let _ = fs::remove_file(destination);
        return Err(Error::Verification {
            path: destination.to_path_buf(),
            expected,
            actual,
        });
    }

    fs::remove_file(source).map_err(|e| Error::fs("remove source", source, e))?;
    Ok(())
}

/// `{stem}_{N}{ext}` for the first free N, then a timestamp suffix.
fn unique_path(wanted: &Path, taken: impl Fn(&Path) -> bool) -> PathBuf {
    let stem = wanted
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = wanted
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let with_name = |name: String| wanted.with_file_name(format!("{name}{suffix}"));

    for counter in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = with_name(format!("{stem}_{counter}"));
        if !taken(&candidate) {
            return candidate;
        }
    }

    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%3f");
    with_name(format!("{stem}_{stamp}"))
}

/// Sidecar path: same base name as the media, `.json` extension.
pub fn sidecar_path(media: &Path) -> PathBuf {
    media.with_extension("json")
}

/// Write the sidecar atomically (temp file, then rename).
fn write_sidecar(media: &Path, record: &MetadataRecord) -> Result<()> {
    let path = sidecar_path(media);
    let json = serde_json::to_vec_pretty(record)?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &json).map_err(|e| Error::fs("write", &temp_path, e))?;
    fs::rename(&temp_path, &path).map_err(|e| Error::fs("rename", &path, e))?;
    Ok(())
}
