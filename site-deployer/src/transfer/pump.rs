//! Transfer pump.
//!
//! Drains the removal queue, then the upload queue, through the transport
//! with exactly one operation in flight, then publishes the new snapshot.
//! Transports that delegate the whole sync get the schedule in one call
//! instead. A failed transport call stops the pump; nothing is rolled back.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::manifest::{ArtifactPaths, EntryKind, SnapshotDescriptor, Target};
use crate::sync::schedule::Schedule;
use crate::transfer::progress::{ProgressSink, ProgressTracker};
use crate::transport::Transport;
use crate::utils::errors::{io_err, DeployError, Result, TransportError};

/// Pump states. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Removing,
    Uploading,
    Finalizing,
    Done,
    Failed,
}

/// What the pump got through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub removed: usize,
    pub uploaded: usize,
    pub operations: usize,
}

pub struct TransferPump<'a> {
    transport: &'a mut dyn Transport,
    schedule: Schedule,
    tracker: ProgressTracker,
    sink: &'a dyn ProgressSink,
    paths: &'a ArtifactPaths,
    revision: &'a str,
    cancel: CancellationToken,
    state: PumpState,
    report: PumpReport,
}

impl<'a> TransferPump<'a> {
    pub fn new(
        transport: &'a mut dyn Transport,
        schedule: Schedule,
        sink: &'a dyn ProgressSink,
        paths: &'a ArtifactPaths,
        revision: &'a str,
        cancel: CancellationToken,
    ) -> Self {
        let tracker = ProgressTracker::new(&schedule, transport.kind().supports_directories());
        Self {
            transport,
            schedule,
            tracker,
            sink,
            paths,
            revision,
            cancel,
            state: PumpState::Removing,
            report: PumpReport::default(),
        }
    }

    /// Current state; `Done` or `Failed` once [`TransferPump::run`] returns.
    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Run the pump to completion or to the first failure.
    ///
    /// A pump runs once; a second call fails without touching the transport.
    pub async fn run(&mut self) -> Result<PumpReport> {
        if matches!(self.state, PumpState::Done | PumpState::Failed) {
            return Err(DeployError::Internal(format!(
                "transfer pump already finished ({:?})",
                self.state
            )));
        }

        self.report.operations = self.tracker.total_operations();
        self.sink.report(&self.tracker.start());

        let result = if self.transport.kind().delegates_sync() {
            self.run_delegated().await
        } else {
            self.run_queued().await
        };

        match result {
            Ok(()) => {
                self.state = PumpState::Done;
                Ok(self.report.clone())
            }
            Err(e) => {
                self.state = PumpState::Failed;
                error!("Transfer aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn run_queued(&mut self) -> Result<()> {
        info!(
            "Draining {} removals and {} uploads",
            self.schedule.removals.len(),
            self.schedule.uploads.len()
        );
        while self.state != PumpState::Done {
            self.step().await?;
        }
        Ok(())
    }

    /// Issue the next operation and advance the state machine.
    async fn step(&mut self) -> Result<()> {
        match self.state {
            PumpState::Removing => match self.schedule.removals.pop() {
                Some(target) => {
                    self.check_cancelled()?;
                    self.remove(&target).await?;
                    self.report.removed += 1;
                    self.sink.report(&self.tracker.advance(&target));
                }
                None => self.state = PumpState::Uploading,
            },
            PumpState::Uploading => match self.schedule.uploads.pop() {
                Some(target) => {
                    self.check_cancelled()?;
                    self.upload(&target).await?;
                    self.report.uploaded += 1;
                    self.sink.report(&self.tracker.advance(&target));
                }
                None => self.state = PumpState::Finalizing,
            },
            PumpState::Finalizing => {
                self.finalize().await?;
                self.state = PumpState::Done;
            }
            PumpState::Done | PumpState::Failed => {}
        }
        Ok(())
    }

    async fn run_delegated(&mut self) -> Result<()> {
        self.check_cancelled()?;
        info!(
            "Delegating {} removals and {} uploads to the {} transport",
            self.schedule.removals.len(),
            self.schedule.uploads.len(),
            self.transport.kind()
        );

        self.transport
            .start_sync(&self.paths.input_dir, &self.schedule)
            .await
            .map_err(|source| transport_err("sync", self.paths.input_dir.display(), source))?;

        self.report.removed = self.schedule.removals.len();
        self.report.uploaded = self.schedule.uploads.len();
        self.schedule = Schedule::default();

        self.state = PumpState::Finalizing;
        self.finalize().await?;
        Ok(())
    }

    async fn remove(&mut self, target: &Target) -> Result<()> {
        debug!("Removing {:?} {}", target.kind, target.path);
        let (operation, result) = match target.kind {
            EntryKind::File => ("remove file", self.transport.remove_file(&target.path).await),
            EntryKind::Directory => (
                "remove directory",
                self.transport.remove_directory(&target.path).await,
            ),
        };
        result.map_err(|source| transport_err(operation, &target.path, source))
    }

    async fn upload(&mut self, target: &Target) -> Result<()> {
        debug!("Uploading {:?} {}", target.kind, target.path);
        let local = self.paths.input_dir.join(&target.path);
        let (operation, result) = match target.kind {
            EntryKind::File => (
                "upload file",
                self.transport.upload_file(&local, &target.path).await,
            ),
            EntryKind::Directory => (
                "upload directory",
                self.transport.upload_directory(&local, &target.path).await,
            ),
        };
        result.map_err(|source| transport_err(operation, &target.path, source))
    }

    /// Promote the local inventory to the cached remote inventory and
    /// publish a fresh revision descriptor.
    ///
    /// The cached revision file is only written once the remote manifest
    /// has been published, so a failed publish leaves the next session
    /// distrusting the remote.
    async fn finalize(&mut self) -> Result<()> {
        self.sink.report(&self.tracker.complete_queue());

        let local_inventory = self.paths.local_inventory();
        relocate(&local_inventory, &self.paths.remote_inventory())?;

        let descriptor = SnapshotDescriptor::new(self.revision);
        descriptor.save(&local_inventory)?;

        self.transport
            .upload_new_file_list(&local_inventory)
            .await
            .map_err(|source| transport_err("publish manifest", local_inventory.display(), source))?;

        descriptor.save(&self.paths.revision())?;
        info!("Published snapshot revision {}", self.revision);

        self.sink.report(&self.tracker.finish());
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Cancellation requested, stopping before next operation");
            return Err(DeployError::Cancelled);
        }
        Ok(())
    }
}

fn transport_err(
    operation: &'static str,
    path: impl std::fmt::Display,
    source: TransportError,
) -> DeployError {
    DeployError::Transport {
        operation,
        path: path.to_string(),
        source,
    }
}

/// Move `from` to `to`, falling back to copy + delete across filesystems.
fn relocate(from: &Path, to: &Path) -> Result<()> {
    if let Some(dir) = to.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| io_err(from, e))?;
    std::fs::remove_file(from).map_err(|e| io_err(from, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Entry, Inventory};
    use crate::sync::diff::DiffResult;
    use crate::sync::schedule::schedule;
    use crate::transfer::progress::{ProgressEvent, COMPLETE, TRANSFER_DONE};
    use crate::transport::{TransportKind, TransportResult};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Records every call; optionally fails on one remote path.
    struct Recorder {
        kind: TransportKind,
        calls: Vec<String>,
        fail_on: Option<String>,
    }

    impl Recorder {
        fn new(kind: TransportKind) -> Self {
            Self {
                kind,
                calls: Vec::new(),
                fail_on: None,
            }
        }

        fn call(&mut self, name: &str, path: &str) -> TransportResult<()> {
            self.calls.push(format!("{name} {path}"));
            if self.fail_on.as_deref() == Some(path) {
                return Err(TransportError::Remote("refused".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for Recorder {
        fn kind(&self) -> TransportKind {
            self.kind
        }
        async fn test_connection(&mut self) -> TransportResult<()> {
            Ok(())
        }
        async fn init_connection(&mut self) -> TransportResult<()> {
            Ok(())
        }
        async fn fetch_manifest(&mut self) -> TransportResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn remove_file(&mut self, remote_path: &str) -> TransportResult<()> {
            self.call("rm", remote_path)
        }
        async fn remove_directory(&mut self, remote_path: &str) -> TransportResult<()> {
            self.call("rmdir", remote_path)
        }
        async fn upload_file(&mut self, _local: &Path, remote_path: &str) -> TransportResult<()> {
            self.call("put", remote_path)
        }
        async fn upload_directory(&mut self, _local: &Path, remote_path: &str) -> TransportResult<()> {
            self.call("mkdir", remote_path)
        }
        async fn upload_new_file_list(&mut self, manifest: &Path) -> TransportResult<()> {
            let descriptor = std::fs::read_to_string(manifest)?;
            self.calls.push(format!("publish {descriptor}"));
            Ok(())
        }
        async fn start_sync(&mut self, _input: &Path, schedule: &Schedule) -> TransportResult<()> {
            self.calls.push(format!(
                "sync {}+{}",
                schedule.removals.len(),
                schedule.uploads.len()
            ));
            Ok(())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        paths: ArtifactPaths,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let paths = ArtifactPaths::new(tmp.path().join("out"), tmp.path().join("cfg"));
        std::fs::create_dir_all(&paths.input_dir).unwrap();
        Inventory::from_entries(vec![Entry::file("index.html", "i2")])
            .save(&paths.local_inventory())
            .unwrap();
        Fixture { _tmp: tmp, paths }
    }

    fn sample() -> Schedule {
        schedule(DiffResult {
            to_remove: vec![Target::directory("old"), Target::file("old/a.html")],
            to_upload: vec![Target::file("index.html"), Target::directory("img")],
        })
    }

    fn collecting_sink() -> (Arc<Mutex<Vec<ProgressEvent>>>, impl ProgressSink) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let sink = move |e: &ProgressEvent| sink_events.lock().unwrap().push(*e);
        (events, sink)
    }

    #[tokio::test]
    async fn test_generic_pump_order_and_finalization() {
        let fx = fixture();
        let mut transport = Recorder::new(TransportKind::Sftp);
        let (events, sink) = collecting_sink();

        let mut pump = TransferPump::new(
            &mut transport,
            sample(),
            &sink,
            &fx.paths,
            "rev-1",
            CancellationToken::new(),
        );
        let report = pump.run().await.unwrap();
        assert_eq!(pump.state(), PumpState::Done);
        drop(pump);

        assert_eq!(
            transport.calls,
            vec![
                "rm old/a.html",
                "rmdir old",
                "mkdir img",
                "put index.html",
                "publish {\n  \"revision\": \"rev-1\"\n}",
            ]
        );
        assert_eq!(
            report,
            PumpReport {
                removed: 2,
                uploaded: 2,
                operations: 5
            }
        );

        // Local inventory became the cached remote inventory.
        let cached = Inventory::load(&fx.paths.remote_inventory()).unwrap();
        assert_eq!(cached.entries(), &[Entry::file("index.html", "i2")]);
        assert_eq!(
            SnapshotDescriptor::load(&fx.paths.revision()).unwrap(),
            SnapshotDescriptor::new("rev-1")
        );
        assert_eq!(
            SnapshotDescriptor::load(&fx.paths.local_inventory()).unwrap(),
            SnapshotDescriptor::new("rev-1")
        );

        let events = events.lock().unwrap();
        let progress: Vec<u8> = events.iter().map(|e| e.progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.first(), Some(&8));
        assert_eq!(progress[progress.len() - 2], TRANSFER_DONE);
        assert_eq!(progress.last(), Some(&COMPLETE));
        assert!(progress[..progress.len() - 1].iter().all(|p| (8..=98).contains(p)));
    }

    #[tokio::test]
    async fn test_delegating_transport_gets_whole_schedule() {
        let fx = fixture();
        let mut transport = Recorder::new(TransportKind::GithubPages);
        let sink = |_: &ProgressEvent| {};

        let report = TransferPump::new(
            &mut transport,
            sample(),
            &sink,
            &fx.paths,
            "rev-2",
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(transport.calls.len(), 2);
        assert_eq!(transport.calls[0], "sync 2+2");
        assert!(transport.calls[1].starts_with("publish"));
        assert_eq!(report.removed, 2);
        assert_eq!(report.uploaded, 2);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_without_publishing() {
        let fx = fixture();
        let mut transport = Recorder::new(TransportKind::Sftp);
        transport.fail_on = Some("img".to_string());
        let sink = |_: &ProgressEvent| {};

        let mut pump = TransferPump::new(
            &mut transport,
            sample(),
            &sink,
            &fx.paths,
            "rev-3",
            CancellationToken::new(),
        );
        let err = pump.run().await.unwrap_err();
        assert_eq!(pump.state(), PumpState::Failed);
        assert!(matches!(pump.run().await, Err(DeployError::Internal(_))));
        drop(pump);

        match err {
            DeployError::Transport {
                operation, path, ..
            } => {
                assert_eq!(operation, "upload directory");
                assert_eq!(path, "img");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!transport.calls.iter().any(|c| c.starts_with("put")));
        assert!(!transport.calls.iter().any(|c| c.starts_with("publish")));
        assert!(!fx.paths.revision().exists());
        assert!(fx.paths.local_inventory().exists());
    }

    #[tokio::test]
    async fn test_cancelled_pump_issues_no_operations() {
        let fx = fixture();
        let mut transport = Recorder::new(TransportKind::Sftp);
        let sink = |_: &ProgressEvent| {};
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = TransferPump::new(&mut transport, sample(), &sink, &fx.paths, "rev-4", cancel)
            .run()
            .await;

        assert!(matches!(result, Err(DeployError::Cancelled)));
        assert!(transport.calls.is_empty());
    }

    #[tokio::test]
    async fn test_empty_schedule_still_publishes() {
        let fx = fixture();
        let mut transport = Recorder::new(TransportKind::Local);
        let (events, sink) = collecting_sink();

        let report = TransferPump::new(
            &mut transport,
            Schedule::default(),
            &sink,
            &fx.paths,
            "rev-5",
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(report.operations, 1);
        assert_eq!(transport.calls.len(), 1);
        assert_eq!(events.lock().unwrap().last().unwrap().progress, COMPLETE);
    }
}
