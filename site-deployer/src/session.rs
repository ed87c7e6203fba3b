//! Deployment session coordinator.
//!
//! Owns everything scoped to one deployment run and drives the phases in
//! order: inventory, connect, snapshot resolution, diff, scheduling, then
//! the transfer pump.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::fs::walker::{build_inventory, WalkOptions};
use crate::manifest::{ArtifactPaths, Inventory, SnapshotDescriptor};
use crate::snapshot::{self, Verdict};
use crate::sync::diff::diff;
use crate::sync::schedule::{schedule, write_audit_logs, Schedule};
use crate::transfer::progress::{ProgressEvent, ProgressSink};
use crate::transfer::pump::{PumpReport, TransferPump};
use crate::transport::{self, Transport};
use crate::utils::errors::{io_err, DeployError, Result};

/// Outcome of a successful session.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub revision: String,
    pub removed: usize,
    pub uploaded: usize,
    pub operations: usize,
    pub snapshot_trusted: bool,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// What a session would do.
///
/// Computing a plan connects to the remote and reads its manifest, but
/// transfers nothing. Only the local inventory and the audit logs are
/// written.
#[derive(Debug, Clone)]
pub struct Plan {
    pub verdict: Verdict,
    pub local_entries: usize,
    pub schedule: Schedule,
}

pub struct DeploySession {
    paths: ArtifactPaths,
    revision: String,
    transport: Box<dyn Transport>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl DeploySession {
    /// Create a session with a fresh revision token.
    pub fn new(
        paths: ArtifactPaths,
        transport: Box<dyn Transport>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            paths,
            revision: Uuid::new_v4().to_string(),
            transport,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a session for the transport selected in `config`.
    pub fn from_config(config: &Config, sink: Arc<dyn ProgressSink>) -> Result<Self> {
        let transport = transport::from_config(&config.transport)?;
        let paths = ArtifactPaths::new(&config.deploy.input_dir, &config.deploy.config_dir);
        Ok(Self::new(paths, transport, sink))
    }

    /// Stop between queue items once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Check the configured target without starting a session.
    pub async fn test_connection(&mut self) -> Result<()> {
        let target = self.transport.kind().to_string();
        self.transport
            .test_connection()
            .await
            .map_err(|source| DeployError::Transport {
                operation: "test connection",
                path: target,
                source,
            })
    }

    /// Compute the schedule without transferring anything or touching the
    /// cached snapshot.
    pub async fn plan(mut self) -> Result<Plan> {
        let _lock = SessionLock::acquire(&self.paths.lock())?;
        let result = self.prepare(false).await;
        self.close().await;
        result
    }

    /// Run the whole session.
    pub async fn run(mut self) -> Result<DeployReport> {
        let _lock = SessionLock::acquire(&self.paths.lock())?;
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            "Starting {} deployment of {} (revision {})",
            self.transport.kind(),
            self.paths.input_dir.display(),
            self.revision
        );

        let result = self.execute().await;
        self.close().await;

        let (plan_trusted, pump) = result?;
        let duration = start.elapsed();
        info!(
            "Deployment finished: {} removed, {} uploaded in {:?}",
            pump.removed, pump.uploaded, duration
        );

        Ok(DeployReport {
            revision: self.revision,
            removed: pump.removed,
            uploaded: pump.uploaded,
            operations: pump.operations,
            snapshot_trusted: plan_trusted,
            started_at,
            duration,
        })
    }

    async fn execute(&mut self) -> Result<(bool, PumpReport)> {
        self.sink.report(&ProgressEvent::phase(0));
        let plan = self.prepare(true).await?;
        let trusted = plan.verdict.is_usable();

        let mut pump = TransferPump::new(
            self.transport.as_mut(),
            plan.schedule,
            self.sink.as_ref(),
            &self.paths,
            &self.revision,
            self.cancel.clone(),
        );
        let report = pump.run().await?;
        Ok((trusted, report))
    }

    async fn connect(&mut self) -> Result<()> {
        let target = self.transport.kind().to_string();
        self.transport
            .init_connection()
            .await
            .map_err(|source| DeployError::Transport {
                operation: "connect",
                path: target,
                source,
            })?;
        self.sink.report(&ProgressEvent::phase(4));
        Ok(())
    }

    /// Inventory, connection, snapshot resolution, diff and scheduling.
    ///
    /// The local tree is walked before the transport is touched, so an
    /// unreadable input never reaches the remote. An adopted legacy remote
    /// inventory is only cached when `persist` is set.
    async fn prepare(&mut self, persist: bool) -> Result<Plan> {
        let kind = self.transport.kind();

        let root = self.paths.input_dir.clone();
        let options = WalkOptions::for_transport(kind);
        let local = tokio::task::spawn_blocking(move || build_inventory(&root, &options))
            .await
            .map_err(|e| DeployError::Internal(format!("inventory task failed: {e}")))??;
        local.save(&self.paths.local_inventory())?;
        info!("Local inventory: {} entries", local.len());
        self.sink.report(&ProgressEvent::phase(2));

        self.connect().await?;

        let fetched = match self.transport.fetch_manifest().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not fetch remote manifest, assuming nothing is deployed: {}", e);
                None
            }
        };
        let cached_revision = SnapshotDescriptor::load(&self.paths.revision()).and_then(|d| d.revision);
        let resolution = snapshot::resolve(
            fetched.as_deref(),
            cached_revision.as_deref(),
            &self.paths.remote_inventory(),
        );
        let mut verdict = resolution.verdict;
        info!("Remote snapshot verdict: {:?}", verdict);
        self.sink.report(&ProgressEvent::phase(6));

        let remote = match resolution.adopted {
            Some(adopted) if persist => match adopted.save(&self.paths.remote_inventory()) {
                Ok(()) => adopted,
                Err(e) => {
                    warn!("Failed to cache legacy remote inventory, uploading everything: {}", e);
                    verdict = Verdict::Malformed;
                    Inventory::new()
                }
            },
            Some(adopted) => adopted,
            None if verdict.is_usable() => match Inventory::load(&self.paths.remote_inventory()) {
                Ok(remote) => remote,
                Err(e) => {
                    warn!("Cached remote inventory unreadable, uploading everything: {}", e);
                    verdict = Verdict::Malformed;
                    Inventory::new()
                }
            },
            None => Inventory::new(),
        };

        let result = diff(&local, &remote, verdict.is_usable(), kind);
        info!(
            "Diff: {} to remove, {} to upload",
            result.to_remove.len(),
            result.to_upload.len()
        );

        let schedule = schedule(result);
        write_audit_logs(&schedule, &self.paths)?;

        Ok(Plan {
            verdict,
            local_entries: local.len(),
            schedule,
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.transport.close().await {
            warn!("Failed to close {} transport: {}", self.transport.kind(), e);
        }
    }
}

/// Marks a session as in flight for one config directory.
///
/// The lock is an empty marker file. A process killed mid-session leaves it
/// behind; the error names the file so it can be removed by hand.
struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DeployError::SessionInProgress(path.to_path_buf()))
            }
            Err(e) => return Err(io_err(path, e)),
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
