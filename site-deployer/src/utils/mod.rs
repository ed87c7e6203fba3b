//! Utility modules for the deployment engine.

pub mod errors;
pub mod logger;

pub use errors::{DeployError, Result, TransportError};
