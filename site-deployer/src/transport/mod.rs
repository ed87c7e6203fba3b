//! Pluggable transport backends.
//!
//! The engine never speaks a wire protocol itself. Every remote operation
//! goes through a [`Transport`], resolved once at session start from the
//! configured [`TransportKind`].

pub mod local;
pub mod sftp;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TransportConfig;
use crate::sync::schedule::Schedule;
use crate::utils::errors::{DeployError, Result, TransportError};

pub use local::LocalTransport;
pub use sftp::SftpTransport;

/// Every backend identifier the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Local,
    Manual,
    Ftp,
    Sftp,
    S3,
    GoogleCloud,
    Netlify,
    Git,
    GithubPages,
    GitlabPages,
}

impl TransportKind {
    pub const ALL: &'static [TransportKind] = &[
        TransportKind::Local,
        TransportKind::Manual,
        TransportKind::Ftp,
        TransportKind::Sftp,
        TransportKind::S3,
        TransportKind::GoogleCloud,
        TransportKind::Netlify,
        TransportKind::Git,
        TransportKind::GithubPages,
        TransportKind::GitlabPages,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Local => "local",
            TransportKind::Manual => "manual",
            TransportKind::Ftp => "ftp",
            TransportKind::Sftp => "sftp",
            TransportKind::S3 => "s3",
            TransportKind::GoogleCloud => "google-cloud",
            TransportKind::Netlify => "netlify",
            TransportKind::Git => "git",
            TransportKind::GithubPages => "github-pages",
            TransportKind::GitlabPages => "gitlab-pages",
        }
    }

    /// Whether the remote has real directories that must be created and
    /// removed explicitly. Key/value stores create prefixes implicitly.
    pub fn supports_directories(&self) -> bool {
        !matches!(
            self,
            TransportKind::S3 | TransportKind::GoogleCloud | TransportKind::Netlify
        )
    }

    /// Whether `.htaccess` / `.htpasswd` can be represented on the remote.
    pub fn supports_root_dotfiles(&self) -> bool {
        !matches!(
            self,
            TransportKind::S3 | TransportKind::GoogleCloud | TransportKind::Netlify
        )
    }

    /// Whether the backend runs its own removal/upload loop through
    /// [`Transport::start_sync`] instead of per-item calls.
    pub fn delegates_sync(&self) -> bool {
        matches!(
            self,
            TransportKind::Netlify
                | TransportKind::Git
                | TransportKind::GithubPages
                | TransportKind::GitlabPages
        )
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        TransportKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DeployError::Config(format!("unknown transport kind '{s}'")))
    }
}

/// Result type returned by transport calls.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Remote backend capability.
///
/// Each call resolves only when the remote operation has completed, which
/// is what lets the pump keep exactly one operation in flight. Remote paths
/// are forward-slash paths relative to the deployment root.
#[async_trait]
pub trait Transport: Send {
    /// Backend identifier; drives the capability policy.
    fn kind(&self) -> TransportKind;

    /// Check that the configured target is reachable and writable.
    async fn test_connection(&mut self) -> TransportResult<()>;

    /// Open the connection used for the rest of the session.
    async fn init_connection(&mut self) -> TransportResult<()>;

    /// Raw bytes of the manifest at the remote well-known location, if any.
    async fn fetch_manifest(&mut self) -> TransportResult<Option<Vec<u8>>>;

    async fn remove_file(&mut self, remote_path: &str) -> TransportResult<()>;

    async fn remove_directory(&mut self, remote_path: &str) -> TransportResult<()>;

    async fn upload_file(&mut self, local_path: &Path, remote_path: &str) -> TransportResult<()>;

    async fn upload_directory(&mut self, local_path: &Path, remote_path: &str)
        -> TransportResult<()>;

    /// Publish `manifest` as the new remote manifest.
    async fn upload_new_file_list(&mut self, manifest: &Path) -> TransportResult<()>;

    /// Apply a whole schedule in one go. Only called when
    /// [`TransportKind::delegates_sync`] is true for this backend; must
    /// report a single aggregate completion.
    async fn start_sync(&mut self, _input_dir: &Path, _schedule: &Schedule) -> TransportResult<()> {
        Err(TransportError::Unsupported("start_sync"))
    }

    /// Release the connection. Called once the session is over.
    async fn close(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

/// Build the transport selected by `config`.
pub fn from_config(config: &TransportConfig) -> Result<Box<dyn Transport>> {
    match config.kind {
        TransportKind::Local | TransportKind::Manual => {
            let local = config.local.as_ref().ok_or_else(|| {
                DeployError::Config("[transport.local] section is required".to_string())
            })?;
            Ok(Box::new(LocalTransport::with_kind(&local.path, config.kind)))
        }
        TransportKind::Sftp => {
            let sftp = config.sftp.as_ref().ok_or_else(|| {
                DeployError::Config("[transport.sftp] section is required".to_string())
            })?;
            Ok(Box::new(SftpTransport::new(sftp.clone())))
        }
        other => Err(DeployError::UnsupportedTransport(other)),
    }
}
