//! Operation-based progress accounting for deployment sessions.
//!
//! Progress is an integer percentage split into three bands:
//!
//! | Phase                      | Range   |
//! |----------------------------|---------|
//! | listing, snapshot, diff    | 0 - 8   |
//! | draining the work queues   | 8 - 98  |
//! | publishing the new snapshot| 98 - 100|

use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::sync::mpsc::UnboundedSender;

use crate::manifest::Target;
use crate::sync::schedule::Schedule;

/// Upper bound of the listing/diff band.
pub const LISTING_DONE: u8 = 8;
/// Upper bound of the draining band.
pub const TRANSFER_DONE: u8 = 98;
/// Reported once the new snapshot is published.
pub const COMPLETE: u8 = 100;

/// A progress notification.
///
/// Serializes as `{"progress": 42, "operations": [3, 7]}`, or with
/// `"operations": false` outside the draining phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub progress: u8,
    #[serde(serialize_with = "operations_or_false")]
    pub operations: Option<(usize, usize)>,
}

impl ProgressEvent {
    pub fn phase(progress: u8) -> Self {
        Self {
            progress,
            operations: None,
        }
    }
}

fn operations_or_false<S: Serializer>(
    value: &Option<(usize, usize)>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some((completed, total)) => [completed, total].serialize(s),
        None => s.serialize_bool(false),
    }
}

/// Receives progress notifications. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Writes progress as log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn report(&self, event: &ProgressEvent) {
        match event.operations {
            Some((completed, total)) => {
                tracing::info!("Progress {}% ({}/{} operations)", event.progress, completed, total)
            }
            None => tracing::info!("Progress {}%", event.progress),
        }
    }
}

/// Forwards progress to a channel, e.g. for a host UI task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn report(&self, event: &ProgressEvent) {
        // A closed receiver only means nobody is watching any more.
        let _ = self.tx.send(*event);
    }
}

/// Counts drained operations and maps them onto the draining band.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_operations: usize,
    completed: usize,
    counts_directories: bool,
    last_reported: u8,
}

impl ProgressTracker {
    /// Tracker for `schedule`. Directory operations only count when the
    /// transport has directories; the snapshot publication always counts
    /// as one extra operation.
    pub fn new(schedule: &Schedule, counts_directories: bool) -> Self {
        let queued = if counts_directories {
            schedule.removals.len() + schedule.uploads.len()
        } else {
            schedule.removals.count_files() + schedule.uploads.count_files()
        };

        Self {
            total_operations: queued + 1,
            completed: 0,
            counts_directories,
            last_reported: LISTING_DONE,
        }
    }

    pub fn total_operations(&self) -> usize {
        self.total_operations
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Event for the start of the draining phase.
    pub fn start(&mut self) -> ProgressEvent {
        self.event(LISTING_DONE)
    }

    /// Record a drained operation and return the resulting event.
    pub fn advance(&mut self, target: &Target) -> ProgressEvent {
        if self.counts_directories || !target.is_dir() {
            self.completed = (self.completed + 1).min(self.total_operations - 1);
        }
        let percent = self.drain_percent();
        self.event(percent)
    }

    /// Mark every queued operation as done (used after a delegated sync).
    pub fn complete_queue(&mut self) -> ProgressEvent {
        self.completed = self.total_operations - 1;
        self.event(TRANSFER_DONE)
    }

    /// Event reported after the snapshot is published.
    pub fn finish(&mut self) -> ProgressEvent {
        self.completed = self.total_operations;
        self.last_reported = COMPLETE;
        ProgressEvent {
            progress: COMPLETE,
            operations: Some((self.completed, self.total_operations)),
        }
    }

    fn drain_percent(&self) -> u8 {
        let band = u64::from(TRANSFER_DONE - LISTING_DONE);
        let step = band * self.completed as u64 / self.total_operations as u64;
        (u64::from(LISTING_DONE) + step).min(u64::from(TRANSFER_DONE)) as u8
    }

    fn event(&mut self, percent: u8) -> ProgressEvent {
        let progress = percent.max(self.last_reported).min(TRANSFER_DONE);
        self.last_reported = progress;
        ProgressEvent {
            progress,
            operations: Some((self.completed, self.total_operations)),
        }
    }
}

/// Format duration as human-readable string
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{}.{:01}s", seconds, duration.subsec_millis() / 100)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::diff::DiffResult;
    use crate::sync::schedule::schedule;

    fn sample_schedule() -> Schedule {
        schedule(DiffResult {
            to_remove: vec![Target::file("old.html"), Target::directory("old")],
            to_upload: vec![
                Target::directory("img"),
                Target::file("index.html"),
                Target::file("img/a.png"),
            ],
        })
    }

    #[test]
    fn test_total_counts_directories_when_supported() {
        let tracker = ProgressTracker::new(&sample_schedule(), true);
        assert_eq!(tracker.total_operations(), 6);

        let tracker = ProgressTracker::new(&sample_schedule(), false);
        assert_eq!(tracker.total_operations(), 4);
    }

    #[test]
    fn test_progress_is_monotonic_and_bounded() {
        let mut schedule = sample_schedule();
        let mut tracker = ProgressTracker::new(&schedule, true);
        let mut last = tracker.start().progress;
        assert_eq!(last, LISTING_DONE);

        while let Some(target) = schedule.removals.pop().or_else(|| schedule.uploads.pop()) {
            let event = tracker.advance(&target);
            assert!(event.progress >= last);
            assert!((LISTING_DONE..=TRANSFER_DONE).contains(&event.progress));
            last = event.progress;
        }
        assert_eq!(tracker.completed(), 5);
        assert_eq!(last, 83);

        let done = tracker.finish();
        assert_eq!(done.progress, COMPLETE);
        assert_eq!(done.operations, Some((6, 6)));
    }

    #[test]
    fn test_single_operation_session() {
        let mut tracker = ProgressTracker::new(&Schedule::default(), true);
        assert_eq!(tracker.total_operations(), 1);
        assert_eq!(tracker.start().progress, LISTING_DONE);
        assert_eq!(tracker.complete_queue().progress, TRANSFER_DONE);
        assert_eq!(tracker.finish().progress, COMPLETE);
    }

    #[test]
    fn test_directories_do_not_advance_without_directory_support() {
        let mut tracker = ProgressTracker::new(&sample_schedule(), false);
        let event = tracker.advance(&Target::directory("img"));
        assert_eq!(event.operations, Some((0, 4)));
        assert_eq!(event.progress, LISTING_DONE);
    }

    #[test]
    fn test_event_serialization() {
        let during = ProgressEvent {
            progress: 53,
            operations: Some((3, 6)),
        };
        assert_eq!(
            serde_json::to_string(&during).unwrap(),
            r#"{"progress":53,"operations":[3,6]}"#
        );
        assert_eq!(
            serde_json::to_string(&ProgressEvent::phase(4)).unwrap(),
            r#"{"progress":4,"operations":false}"#
        );
    }

    #[test]
    fn test_channel_sink_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.report(&ProgressEvent::phase(2));
        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::phase(2));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m");
    }
}
