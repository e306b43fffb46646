//! Failure taxonomy and the retry/fallback decision table.
//!
//! Every external failure (scraper call, filesystem operation, config check)
//! is mapped into one of five [`ErrorKind`]s. The resolver and the pipeline
//! never inspect raw errors to decide what to do next; they ask the
//! [`ErrorClassifier`] for a [`Decision`] instead.
//!
//! | Kind         | Decision                                           |
//! |--------------|----------------------------------------------------|
//! | `Network`    | retry with backoff, then fall back to next source  |
//! | `Parse`      | fall back to next source immediately               |
//! | `Auth`       | disable the source for the rest of the run         |
//! | `FileSystem` | abort the task (disk-full, unwritable target root  |
//! |              | or ledger: abort the pipeline)                     |
//! | `Validation` | fatal at startup                                   |

use std::fmt;
use std::io;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The fixed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Parse,
    Auth,
    FileSystem,
    Validation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Parse => "parse",
            ErrorKind::Auth => "auth",
            ErrorKind::FileSystem => "file_system",
            ErrorKind::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by a [`Scraper`](crate::scraper::Scraper).
///
/// Each variant maps to exactly one [`ErrorKind`] via [`ScrapeError::kind`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScrapeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited - try again later")]
    RateLimited,

    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The source answered but has no record for the identifier.
    #[error("No record found for {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl ScrapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::Network(_) | ScrapeError::Timeout(_) | ScrapeError::RateLimited => {
                ErrorKind::Network
            }
            // A missing record is handled exactly like unparseable content:
            // retrying the same source will not change the answer.
            ScrapeError::Parse(_) | ScrapeError::NotFound(_) => ErrorKind::Parse,
            ScrapeError::Auth(_) => ErrorKind::Auth,
        }
    }
}

/// Which kind of filesystem operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    /// Reading or hashing a source file.
    ReadSource,
    /// Creating directories or writing files below the target root.
    WriteTarget,
    /// The target root itself no longer accepts writes.
    TargetRoot,
    /// Appending to the progress ledger.
    Ledger,
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Try the same source again after the given delay.
    Retry { after: Duration },
    /// Give up on this source and move to the next one.
    Fallback,
    /// Mark the source unavailable for the remainder of the run.
    DisableSource,
    /// Fail the owning task only.
    AbortTask,
    /// Stop the whole pipeline.
    AbortPipeline,
    /// Refuse to start.
    FatalStartup,
}

/// Exponential backoff with bounded attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt).
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Scale each delay to 50-100% of its nominal value.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let nominal = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if self.jitter {
            let scale: f64 = rand::rng().random_range(0.5..=1.0);
            nominal.mul_f64(scale)
        } else {
            nominal
        }
    }

    /// Total attempts allowed against one source.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// The single seam every retry/skip/abort decision goes through.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    policy: RetryPolicy,
}

impl ErrorClassifier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide what to do after `attempt` (zero-based) failed with `kind`.
    pub fn decide(&self, kind: ErrorKind, attempt: u32) -> Decision {
        match kind {
            ErrorKind::Network if attempt < self.policy.max_retries => Decision::Retry {
                after: self.policy.delay(attempt),
            },
            ErrorKind::Network | ErrorKind::Parse => Decision::Fallback,
            ErrorKind::Auth => Decision::DisableSource,
            ErrorKind::FileSystem => Decision::AbortTask,
            ErrorKind::Validation => Decision::FatalStartup,
        }
    }

    pub fn decide_scrape(&self, err: &ScrapeError, attempt: u32) -> Decision {
        self.decide(err.kind(), attempt)
    }

    /// Filesystem failures abort the owning task, unless the condition
    /// affects every task: a full or read-only disk, an unwritable target
    /// root, or a ledger that can no longer be written.
    pub fn decide_io(&self, err: &io::Error, op: FsOp) -> Decision {
        match err.kind() {
            io::ErrorKind::StorageFull | io::ErrorKind::ReadOnlyFilesystem => {
                Decision::AbortPipeline
            }
            _ if matches!(op, FsOp::Ledger | FsOp::TargetRoot) => Decision::AbortPipeline,
            _ => Decision::AbortTask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: u32) -> ErrorClassifier {
        ErrorClassifier::new(RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: false,
        })
    }

    #[test]
    fn test_scrape_error_kinds() {
        assert_eq!(ScrapeError::Network("refused".into()).kind(), ErrorKind::Network);
        assert_eq!(ScrapeError::Timeout(Duration::from_secs(1)).kind(), ErrorKind::Network);
        assert_eq!(ScrapeError::RateLimited.kind(), ErrorKind::Network);
        assert_eq!(ScrapeError::Parse("bad html".into()).kind(), ErrorKind::Parse);
        assert_eq!(ScrapeError::NotFound("ABC-123".into()).kind(), ErrorKind::Parse);
        assert_eq!(ScrapeError::Auth("expired".into()).kind(), ErrorKind::Auth);
    }

    #[test]
    fn test_network_retries_then_falls_back() {
        let classifier = no_jitter(2);
        let err = ScrapeError::Timeout(Duration::from_secs(30));

        assert_eq!(
            classifier.decide_scrape(&err, 0),
            Decision::Retry { after: Duration::from_millis(100) }
        );
        assert_eq!(
            classifier.decide_scrape(&err, 1),
            Decision::Retry { after: Duration::from_millis(200) }
        );
        assert_eq!(classifier.decide_scrape(&err, 2), Decision::Fallback);
    }

    #[test]
    fn test_parse_and_auth_never_retry() {
        let classifier = no_jitter(5);
        assert_eq!(
            classifier.decide_scrape(&ScrapeError::Parse("x".into()), 0),
            Decision::Fallback
        );
        assert_eq!(
            classifier.decide_scrape(&ScrapeError::Auth("x".into()), 0),
            Decision::DisableSource
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: false,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(500));
        assert_eq!(policy.delay(40), Duration::from_millis(500));
        assert_eq!(policy.max_attempts(), 11);
    }

    #[test]
    fn test_jitter_stays_within_half_to_full() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            jitter: true,
        };
        for _ in 0..50 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(2000));
        }
    }

    #[test]
    fn test_disk_full_aborts_pipeline() {
        let classifier = ErrorClassifier::default();
        let full = io::Error::new(io::ErrorKind::StorageFull, "no space left on device");
        assert_eq!(
            classifier.decide_io(&full, FsOp::WriteTarget),
            Decision::AbortPipeline
        );

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(classifier.decide_io(&denied, FsOp::ReadSource), Decision::AbortTask);
        assert_eq!(classifier.decide_io(&denied, FsOp::Ledger), Decision::AbortPipeline);
    }

    #[test]
    fn test_unwritable_target_root_aborts_pipeline() {
        let classifier = ErrorClassifier::default();
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(classifier.decide_io(&denied, FsOp::WriteTarget), Decision::AbortTask);
        assert_eq!(
            classifier.decide_io(&denied, FsOp::TargetRoot),
            Decision::AbortPipeline
        );
    }

    #[test]
    fn test_validation_is_fatal_at_startup() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.decide(ErrorKind::Validation, 0),
            Decision::FatalStartup
        );
        assert_eq!(classifier.decide(ErrorKind::FileSystem, 0), Decision::AbortTask);
    }
}
