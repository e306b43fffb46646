//! Lock-free progress counters shared by the feeder, the workers and any
//! status query.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::model::Outcome;

/// Point-in-time view of pipeline progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    pub queued: usize,
    pub in_flight: usize,
    pub done: usize,
    pub counts: OutcomeCounts,
}

/// Finished tasks per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub success: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub unresolved: usize,
}

impl OutcomeCounts {
    pub fn get(&self, outcome: Outcome) -> usize {
        match outcome {
            Outcome::Success => self.success,
            Outcome::SkippedDuplicate => self.skipped_duplicate,
            Outcome::Failed => self.failed,
            Outcome::Unresolved => self.unresolved,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.skipped_duplicate + self.failed + self.unresolved
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} success, {} skipped-duplicate, {} unresolved, {} failed",
            self.success, self.skipped_duplicate, self.unresolved, self.failed
        )
    }
}

/// Counters updated as tasks move through the pipeline.
#[derive(Debug, Default)]
pub struct StatusTracker {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    done: AtomicUsize,
    outcomes: [AtomicUsize; 4],
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A file entered the work queue.
    pub fn enqueued(&self) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    /// A worker picked a file off the queue.
    pub fn started(&self) {
        decrement(&self.queued);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// A task reached `Done(outcome)`.
    pub fn finished(&self, outcome: Outcome) {
        decrement(&self.in_flight);
        self.outcomes[slot(outcome)].fetch_add(1, Ordering::SeqCst);
        self.done.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Status {
        let count = |o| self.outcomes[slot(o)].load(Ordering::SeqCst);
        Status {
            queued: self.queued.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            done: self.done.load(Ordering::SeqCst),
            counts: OutcomeCounts {
                success: count(Outcome::Success),
                skipped_duplicate: count(Outcome::SkippedDuplicate),
                failed: count(Outcome::Failed),
                unresolved: count(Outcome::Unresolved),
            },
        }
    }
}

fn slot(outcome: Outcome) -> usize {
    match outcome {
        Outcome::Success => 0,
        Outcome::SkippedDuplicate => 1,
        Outcome::Failed => 2,
        Outcome::Unresolved => 3,
    }
}

fn decrement(counter: &AtomicUsize) {
    // Saturate at zero
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_lifecycle_counts() {
        let tracker = StatusTracker::new();
        tracker.enqueued();
        tracker.enqueued();
        tracker.started();

        let status = tracker.snapshot();
        assert_eq!((status.queued, status.in_flight, status.done), (1, 1, 0));

        tracker.finished(Outcome::Unresolved);
        tracker.started();
        tracker.finished(Outcome::Success);

        let status = tracker.snapshot();
        assert_eq!((status.queued, status.in_flight, status.done), (0, 0, 2));
        assert_eq!(status.counts.get(Outcome::Success), 1);
        assert_eq!(status.counts.get(Outcome::Unresolved), 1);
        assert_eq!(status.counts.total(), 2);
    }

    #[test]
    fn test_counters_never_underflow() {
        let tracker = StatusTracker::new();
        tracker.started();
        tracker.finished(Outcome::Failed);
        let status = tracker.snapshot();
        assert_eq!((status.queued, status.in_flight), (0, 0));
        assert_eq!(status.counts.failed, 1);
    }
}
