//! Local directory transport.
//!
//! Mirrors the site into a directory on this machine. Also serves the
//! `manual` kind, where the target directory is handed off by hand.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{Transport, TransportKind, TransportResult};
use crate::manifest::LOCAL_INVENTORY_FILE;
use crate::utils::errors::TransportError;

pub struct LocalTransport {
    root: PathBuf,
    kind: TransportKind,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_kind(root.into(), TransportKind::Local)
    }

    pub fn with_kind(root: impl AsRef<Path>, kind: TransportKind) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            kind,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, remote_path: &str) -> PathBuf {
        remote_path
            .split('/')
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

/// Removing something that is already gone counts as success; an earlier
/// interrupted session may have got there first.
fn tolerate_missing(result: std::io::Result<()>) -> TransportResult<()> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other.map_err(TransportError::from),
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn test_connection(&mut self) -> TransportResult<()> {
        fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(".site-deployer-probe");
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }

    async fn init_connection(&mut self) -> TransportResult<()> {
        fs::create_dir_all(&self.root).await?;
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(TransportError::Connection(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn fetch_manifest(&mut self) -> TransportResult<Option<Vec<u8>>> {
        match fs::read(self.root.join(LOCAL_INVENTORY_FILE)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&mut self, remote_path: &str) -> TransportResult<()> {
        tolerate_missing(fs::remove_file(self.target(remote_path)).await)
    }

    async fn remove_directory(&mut self, remote_path: &str) -> TransportResult<()> {
        // Not recursive: the schedule empties the directory first.
        tolerate_missing(fs::remove_dir(self.target(remote_path)).await)
    }

    async fn upload_file(&mut self, local_path: &Path, remote_path: &str) -> TransportResult<()> {
        fs::copy(local_path, self.target(remote_path)).await?;
        Ok(())
    }

    async fn upload_directory(&mut self, _local_path: &Path, remote_path: &str) -> TransportResult<()> {
        match fs::create_dir(self.target(remote_path)).await {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            other => other.map_err(TransportError::from),
        }
    }

    async fn upload_new_file_list(&mut self, manifest: &Path) -> TransportResult<()> {
        fs::copy(manifest, self.root.join(LOCAL_INVENTORY_FILE)).await?;
        Ok(())
    }
}
