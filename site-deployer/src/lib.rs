//! Site Deployer Library
//!
//! Incremental deployment of a generated static site to a remote target.
//! Only changed entries are transferred; the remote listing is trusted when
//! the revision published by the previous session is still in place.

pub mod config;
pub mod fs;
pub mod manifest;
pub mod session;
pub mod shutdown;
pub mod snapshot;
pub mod sync;
pub mod transfer;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use session::{DeployReport, DeploySession, Plan};
pub use transport::{Transport, TransportKind};
pub use utils::errors::{DeployError, TransportError};
pub type Result<T> = std::result::Result<T, DeployError>;
