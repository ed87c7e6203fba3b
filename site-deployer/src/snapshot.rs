//! Remote snapshot trust resolution.
//!
//! Decides whether the cached remote inventory still describes the remote
//! target, so the diff can rely on it instead of uploading everything.

use std::path::Path;

use serde::Deserialize;

use crate::fs::fingerprint::md5_hex;
use crate::manifest::{Entry, Inventory};

/// How the resolver reached its verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Remote revision equals the revision cached by the last session.
    RevisionMatch,
    /// No cached revision, but the remote revision equals the checksum of
    /// the cached remote inventory (upgrade from pre-revision caches).
    ChecksumMatch,
    /// Remote holds a full inventory from a pre-revision deployment, which
    /// is used as the remote inventory directly.
    LegacyInventory,
    /// Remote revision differs from what this machine last published.
    Mismatch,
    /// Nothing found at the remote manifest location.
    NoManifest,
    /// Remote manifest could not be interpreted.
    Malformed,
}

impl Verdict {
    /// Whether the cached remote inventory can be used for diffing.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            Verdict::RevisionMatch | Verdict::ChecksumMatch | Verdict::LegacyInventory
        )
    }
}

/// Verdict plus, for a legacy remote, the inventory it declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub verdict: Verdict,
    pub adopted: Option<Inventory>,
}

impl From<Verdict> for Resolution {
    fn from(verdict: Verdict) -> Self {
        Self {
            verdict,
            adopted: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RemoteManifest {
    Descriptor { revision: String },
    Inventory(Vec<Entry>),
}

/// Resolve whether the remote snapshot is trustworthy.
///
/// * `fetched` - raw bytes at the remote manifest location, if any
/// * `cached_revision` - revision token from the last successful session
/// * `remote_inventory` - path of the cached remote inventory file
///
/// Never fails: anything unexpected degrades to an untrusted verdict, which
/// forces a full upload. Nothing is written; the cached remote inventory is
/// only read.
pub fn resolve(
    fetched: Option<&[u8]>,
    cached_revision: Option<&str>,
    remote_inventory: &Path,
) -> Resolution {
    let Some(bytes) = fetched else {
        tracing::info!("No remote manifest found, remote snapshot treated as empty");
        return Verdict::NoManifest.into();
    };

    let manifest = match serde_json::from_slice::<RemoteManifest>(bytes) {
        Ok(manifest) => manifest,
        Err(e) => {
            tracing::warn!("Remote manifest is not usable: {}", e);
            return Verdict::Malformed.into();
        }
    };

    let verdict = match manifest {
        RemoteManifest::Descriptor { revision } => match cached_revision {
            Some(cached) if cached == revision => Verdict::RevisionMatch,
            Some(cached) => {
                tracing::info!(
                    "Remote revision {} does not match cached revision {}",
                    revision,
                    cached
                );
                Verdict::Mismatch
            }
            None => match std::fs::read(remote_inventory) {
                Ok(cached_bytes) if md5_hex(&cached_bytes) == revision => Verdict::ChecksumMatch,
                Ok(_) => {
                    tracing::info!("Cached remote inventory checksum does not match remote revision");
                    Verdict::Mismatch
                }
                Err(e) => {
                    tracing::warn!(
                        "Cannot read cached remote inventory {}: {}",
                        remote_inventory.display(),
                        e
                    );
                    Verdict::Mismatch
                }
            },
        },
        RemoteManifest::Inventory(entries) => {
            let inventory = Inventory::from_entries(entries);
            tracing::info!(
                "Adopting legacy remote inventory with {} entries",
                inventory.len()
            );
            return Resolution {
                verdict: Verdict::LegacyInventory,
                adopted: Some(inventory),
            };
        }
    };
    verdict.into()
}
