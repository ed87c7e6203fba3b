//! Configuration management for the deployment engine.
//!
//! Loads configuration from a TOML file, then applies environment variable
//! overrides prefixed with `SITE_DEPLOY__` (`__` separates nested keys, e.g.
//! `SITE_DEPLOY__TRANSPORT__SFTP__PASSWORD`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::transport::TransportKind;
use crate::utils::errors::{DeployError, Result};

const ENV_PREFIX: &str = "SITE_DEPLOY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub deploy: DeployConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Build output directory to deploy
    pub input_dir: PathBuf,

    /// Directory holding the cached snapshot, revision and audit logs
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Backend identifier (local, sftp, s3, ...)
    pub kind: TransportKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sftp: Option<SftpConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Target directory that mirrors the input tree
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,

    #[serde(default = "default_sftp_port")]
    pub port: u16,

    pub username: String,

    /// Password authentication (used when no key file is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Private key authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    /// Remote directory that receives the site
    #[serde(default = "default_remote_root")]
    pub remote_root: String,

    /// Connect timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_config_dir() -> PathBuf {
    PathBuf::from(".deploy")
}

fn default_sftp_port() -> u16 {
    22
}

fn default_remote_root() -> String {
    ".".to_string()
}

fn default_timeout_ms() -> u32 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file plus environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| DeployError::Config(format!("{}: {e}", path.display())))?;

        settings
            .try_deserialize::<Config>()
            .map_err(|e| DeployError::Config(format!("{}: {e}", path.display())))
    }

    /// Render as TOML (used by `init-config`)
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DeployError::Config(e.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            deploy: DeployConfig {
                input_dir: PathBuf::from("output"),
                config_dir: default_config_dir(),
            },
            transport: TransportConfig {
                kind: TransportKind::Local,
                local: Some(LocalConfig {
                    path: PathBuf::from("public_html"),
                }),
                sftp: None,
            },
            log: LogConfig::default(),
        }
    }
}
