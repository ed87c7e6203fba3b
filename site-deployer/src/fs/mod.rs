pub mod fingerprint;
pub mod walker;
