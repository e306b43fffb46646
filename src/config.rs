//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\av-organizer\config.toml
//! - macOS: ~/Library/Application Support/av-organizer/config.toml
//! - Linux: ~/.config/av-organizer/config.toml
//!
//! Every section is `#[serde(default)]`, so a partial file only overrides
//! what it names. [`Config::validate`] runs once at startup; a failure there
//! is fatal before any task is scheduled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::RetryPolicy;
use crate::error::Error;
use crate::organizer::template;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where media comes from and where it goes
    pub library: LibraryConfig,

    /// Worker pool sizing
    pub pipeline: PipelineConfig,

    /// Metadata source selection, timeouts and retries
    pub scraping: ScrapingConfig,

    /// Target layout and conflict handling
    pub organize: OrganizeConfig,

    /// Image downloads
    pub assets: AssetsConfig,

    /// HTTP JSON metadata sources
    pub sources: Vec<SourceConfig>,

    /// Per-source session material (kept separate for potential future encryption)
    pub credentials: Credentials,
}

/// Source and target directories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub source_directory: PathBuf,
    pub target_directory: PathBuf,
    /// Extensions without the dot, matched case-insensitively
    pub supported_extensions: Vec<String>,
    /// Progress ledger location (default: `<target>/.av-organizer/progress.jsonl`)
    pub ledger_path: Option<PathBuf>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            source_directory: PathBuf::new(),
            target_directory: PathBuf::new(),
            supported_extensions: ["mp4", "mkv", "avi", "wmv", "mov", "flv", "webm", "m4v"]
                .into_iter()
                .map(String::from)
                .collect(),
            ledger_path: None,
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Files processed at once
    pub max_concurrent_files: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: 3,
        }
    }
}

/// How several sources are combined for one identifier
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Try sources one by one in priority order
    #[default]
    PriorityFallback,
    /// Query every source at once, keep the best-ranked success
    ParallelRace,
}

/// Metadata source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Source names, highest priority first
    pub scraper_priority: Vec<String>,
    pub resolution_strategy: ResolutionStrategy,
    /// Outstanding calls allowed against any single source
    pub max_concurrent_requests: usize,
    pub request_timeout_seconds: u64,
    /// Retries after the first attempt, per source
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// How often availability probes are refreshed
    pub probe_interval_seconds: u64,
    /// Parallel-race only: fill gaps in the winner from the other successes
    pub merge_results: bool,
    /// Extra identifier regexes, tried before the built-in ones
    pub identifier_patterns: Vec<String>,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            scraper_priority: vec!["javdb".to_string(), "javlibrary".to_string()],
            resolution_strategy: ResolutionStrategy::default(),
            max_concurrent_requests: 2,
            request_timeout_seconds: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            probe_interval_seconds: 300,
            merge_results: false,
            identifier_patterns: Vec::new(),
        }
    }
}

impl ScrapingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter: true,
        }
    }
}

/// What to do when the destination path is already taken
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Append `_1`, `_2`, ... until the name is free
    #[default]
    Rename,
    /// Leave the existing file and skip the task
    Skip,
    /// Replace the existing file
    Overwrite,
}

/// Target layout settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizeConfig {
    /// Placeholders: {actress} {actresses} {code} {title} {studio} {series}
    /// {year} {month} {day} {original_name} {ext}
    pub naming_pattern: String,
    pub conflict_resolution: ConflictPolicy,
    /// Copy, verify, then delete the source instead of moving directly
    pub safe_mode: bool,
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            naming_pattern: "{actress}/{code}/{code}.{ext}".to_string(),
            conflict_resolution: ConflictPolicy::default(),
            safe_mode: true,
        }
    }
}

/// Image download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub download_images: bool,
    pub max_concurrent_downloads: usize,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            download_images: true,
            max_concurrent_downloads: 3,
        }
    }
}

/// A metadata source reachable as a JSON endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique name referenced by `scraper_priority`
    pub name: String,
    /// URL with a `{code}` placeholder, e.g. `https://meta.local/javdb/{code}`
    pub url_template: String,
    /// Lightweight URL hit by availability probes (defaults to the template host)
    #[serde(default)]
    pub probe_url: Option<String>,
}

/// Session material per source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Cookie header values keyed by source name
    pub cookies: HashMap<String, String>,
}

impl Config {
    /// Ledger location, defaulting to a hidden directory under the target.
    pub fn ledger_path(&self) -> PathBuf {
        self.library.ledger_path.clone().unwrap_or_else(|| {
            self.library
                .target_directory
                .join(".av-organizer")
                .join("progress.jsonl")
        })
    }

    /// Normalized extension set (lower-case, no leading dot).
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self
            .library
            .supported_extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        exts.sort();
        exts.dedup();
        exts
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), Error> {
        let lib = &self.library;
        if lib.source_directory.as_os_str().is_empty() {
            return Err(Error::validation("source_directory cannot be empty"));
        }
        if lib.target_directory.as_os_str().is_empty() {
            return Err(Error::validation("target_directory cannot be empty"));
        }
        if !lib.source_directory.is_dir() {
            return Err(Error::validation(format!(
                "source_directory {} is not a directory",
                lib.source_directory.display()
            )));
        }
        if same_path(&lib.source_directory, &lib.target_directory) {
            return Err(Error::validation(
                "source_directory and target_directory cannot be the same",
            ));
        }
        if self.extensions().is_empty() {
            return Err(Error::validation("supported_extensions cannot be empty"));
        }
        if self.pipeline.max_concurrent_files < 1 {
            return Err(Error::validation("max_concurrent_files must be at least 1"));
        }
        if self.scraping.max_concurrent_requests < 1 {
            return Err(Error::validation("max_concurrent_requests must be at least 1"));
        }
        if self.assets.max_concurrent_downloads < 1 {
            return Err(Error::validation("max_concurrent_downloads must be at least 1"));
        }
        if self.scraping.request_timeout_seconds < 1 {
            return Err(Error::validation("request_timeout_seconds must be at least 1"));
        }
        if self.scraping.scraper_priority.is_empty() {
            return Err(Error::validation("scraper_priority cannot be empty"));
        }
        let mut names = std::collections::HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(Error::validation(format!(
                    "source {:?} is defined more than once",
                    source.name
                )));
            }
            if !source.url_template.contains("{code}") {
                return Err(Error::validation(format!(
                    "source {:?} url_template must contain {{code}}",
                    source.name
                )));
            }
        }
        template::validate(&self.organize.naming_pattern)?;
        for pattern in &self.scraping.identifier_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                Error::validation(format!("invalid identifier pattern {pattern:?}: {e}"))
            })?;
        }
        Ok(())
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("av-organizer"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match load_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            tracing::warn!("Using default configuration");
            Config::default()
        }
    }
}

/// Load configuration from an explicit path, failing on any problem
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let config = toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
    tracing::info!("Loaded config from {:?}", path);
    Ok(config)
}

/// Save configuration to disk
///
/// Creates the parent directory if it doesn't exist.
pub fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    // Serialize to pretty TOML
    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
