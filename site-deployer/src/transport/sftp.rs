//! SFTP transport over ssh2.
//!
//! ssh2 is blocking, so every call runs on the blocking thread pool while
//! the pump awaits its completion.

use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};

use super::{Transport, TransportKind, TransportResult};
use crate::config::SftpConfig;
use crate::manifest::LOCAL_INVENTORY_FILE;
use crate::utils::errors::TransportError;

/// LIBSSH2_FX_NO_SUCH_FILE
const FX_NO_SUCH_FILE: i32 = 2;

struct SftpConnection {
    session: Session,
    sftp: Sftp,
}

pub struct SftpTransport {
    config: SftpConfig,
    conn: Option<Arc<Mutex<SftpConnection>>>,
}

impl SftpTransport {
    pub fn new(config: SftpConfig) -> Self {
        Self { config, conn: None }
    }

    fn remote(&self, remote_path: &str) -> PathBuf {
        let root = self.config.remote_root.trim_end_matches('/');
        let path = remote_path.trim_start_matches('/');
        if root.is_empty() {
            PathBuf::from(format!("/{path}"))
        } else {
            PathBuf::from(format!("{root}/{path}"))
        }
    }

    /// Run `f` against the open SFTP channel on the blocking pool.
    async fn with_sftp<T, F>(&self, f: F) -> TransportResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> TransportResult<T> + Send + 'static,
    {
        let conn = self
            .conn
            .clone()
            .ok_or_else(|| TransportError::Connection("SFTP connection not initialised".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| TransportError::Connection("SFTP connection poisoned".to_string()))?;
            f(&conn.sftp)
        })
        .await
        .map_err(|e| TransportError::Remote(format!("SFTP task failed: {e}")))?
    }
}

fn connect(config: &SftpConfig) -> TransportResult<SftpConnection> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
        TransportError::Connection(format!("{}:{}: {}", config.host, config.port, e))
    })?;

    let mut session = Session::new()?;
    session.set_timeout(config.timeout_ms);
    session.set_tcp_stream(tcp);
    session.handshake()?;

    match (&config.key_file, &config.password) {
        (Some(key), _) => session.userauth_pubkey_file(
            &config.username,
            None,
            key,
            config.passphrase.as_deref(),
        )?,
        (None, Some(password)) => session.userauth_password(&config.username, password)?,
        (None, None) => session.userauth_agent(&config.username)?,
    }

    if !session.authenticated() {
        return Err(TransportError::Connection(format!(
            "SSH authentication failed for {}@{}",
            config.username, config.host
        )));
    }

    let sftp = session.sftp()?;
    Ok(SftpConnection { session, sftp })
}

fn is_missing(err: &ssh2::Error) -> bool {
    err.code() == ErrorCode::SFTP(FX_NO_SUCH_FILE)
}

#[async_trait]
impl Transport for SftpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sftp
    }

    async fn test_connection(&mut self) -> TransportResult<()> {
        let config = self.config.clone();
        let root = self.remote("");
        tokio::task::spawn_blocking(move || {
            let conn = connect(&config)?;
            let stat = conn.sftp.stat(&root)?;
            if !stat.is_dir() {
                return Err(TransportError::Connection(format!(
                    "{} is not a directory",
                    root.display()
                )));
            }
            let _ = conn.session.disconnect(None, "connection test", None);
            Ok(())
        })
        .await
        .map_err(|e| TransportError::Remote(format!("SFTP task failed: {e}")))?
    }

    async fn init_connection(&mut self) -> TransportResult<()> {
        let config = self.config.clone();
        let root = self.remote("");
        let conn = tokio::task::spawn_blocking(move || {
            let conn = connect(&config)?;
            if let Err(e) = conn.sftp.stat(&root) {
                if !is_missing(&e) {
                    return Err(e.into());
                }
                conn.sftp.mkdir(&root, 0o755)?;
            }
            Ok::<_, TransportError>(conn)
        })
        .await
        .map_err(|e| TransportError::Remote(format!("SFTP task failed: {e}")))??;

        tracing::info!(host = %self.config.host, "SFTP connection established");
        self.conn = Some(Arc::new(Mutex::new(conn)));
        Ok(())
    }

    async fn fetch_manifest(&mut self) -> TransportResult<Option<Vec<u8>>> {
        let path = self.remote(LOCAL_INVENTORY_FILE);
        self.with_sftp(move |sftp| match sftp.open(&path) {
            Ok(mut file) => {
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn remove_file(&mut self, remote_path: &str) -> TransportResult<()> {
        let path = self.remote(remote_path);
        self.with_sftp(move |sftp| match sftp.unlink(&path) {
            Err(e) if !is_missing(&e) => Err(e.into()),
            _ => Ok(()),
        })
        .await
    }

    async fn remove_directory(&mut self, remote_path: &str) -> TransportResult<()> {
        let path = self.remote(remote_path);
        self.with_sftp(move |sftp| match sftp.rmdir(&path) {
            Err(e) if !is_missing(&e) => Err(e.into()),
            _ => Ok(()),
        })
        .await
    }

    async fn upload_file(&mut self, local_path: &Path, remote_path: &str) -> TransportResult<()> {
        let local = local_path.to_path_buf();
        let path = self.remote(remote_path);
        self.with_sftp(move |sftp| {
            let mut source = std::fs::File::open(&local)?;
            let mut remote_file = sftp.create(&path)?;
            std::io::copy(&mut source, &mut remote_file)?;
            Ok(())
        })
        .await
    }

    async fn upload_directory(&mut self, _local_path: &Path, remote_path: &str) -> TransportResult<()> {
        let path = self.remote(remote_path);
        self.with_sftp(move |sftp| match sftp.mkdir(&path, 0o755) {
            Ok(()) => Ok(()),
            // mkdir on an existing directory is a generic failure in SFTP v3.
            Err(e) => match sftp.stat(&path) {
                Ok(stat) if stat.is_dir() => Ok(()),
                _ => Err(e.into()),
            },
        })
        .await
    }

    async fn upload_new_file_list(&mut self, manifest: &Path) -> TransportResult<()> {
        self.upload_file(manifest, LOCAL_INVENTORY_FILE).await
    }

    async fn close(&mut self) -> TransportResult<()> {
        if let Some(conn) = self.conn.take() {
            tokio::task::spawn_blocking(move || {
                let Ok(conn) = conn.lock() else {
                    return;
                };
                let _ = conn.session.disconnect(None, "deployment finished", None);
            })
            .await
            .map_err(|e| TransportError::Remote(format!("SFTP task failed: {e}")))?;
        }
        Ok(())
    }
}
