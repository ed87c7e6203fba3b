//! Diff engine.
//!
//! Joins the local inventory with the cached remote inventory on path and
//! fingerprint. This is not a move detector: a renamed file is one removal
//! plus one upload.

use std::collections::HashMap;

use serde::Serialize;

use crate::manifest::{Entry, Inventory, Target};
use crate::transport::TransportKind;

/// Removal and upload sets, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub to_remove: Vec<Target>,
    pub to_upload: Vec<Target>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_upload.is_empty()
    }
}

/// Compute what must be removed from and uploaded to the remote.
///
/// When `remote_usable` is false the remote inventory is ignored entirely:
/// everything local is uploaded and nothing is removed. Directory entries
/// are dropped from both sets for transports without directories.
pub fn diff(
    local: &Inventory,
    remote: &Inventory,
    remote_usable: bool,
    transport: TransportKind,
) -> DiffResult {
    let empty = Inventory::new();
    let remote = if remote_usable { remote } else { &empty };
    let with_dirs = transport.supports_directories();

    let remote_by_path: HashMap<&str, &Entry> =
        remote.iter().map(|e| (e.path.as_str(), e)).collect();
    let local_by_path: HashMap<&str, &Entry> =
        local.iter().map(|e| (e.path.as_str(), e)).collect();

    let to_remove = remote
        .iter()
        .filter(|e| with_dirs || !e.is_dir())
        .filter(|e| match local_by_path.get(e.path.as_str()) {
            None => true,
            // A path that changed kind is cleared before it is re-created.
            Some(l) => l.kind != e.kind,
        })
        .map(Entry::to_target)
        .collect();

    let to_upload = local
        .iter()
        .filter(|e| with_dirs || !e.is_dir())
        .filter(|e| match remote_by_path.get(e.path.as_str()) {
            None => true,
            Some(r) if r.kind != e.kind => true,
            Some(_) if e.is_dir() => false,
            Some(r) => r.md5 != e.md5,
        })
        .map(Entry::to_target)
        .collect();

    DiffResult {
        to_remove,
        to_upload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> Inventory {
        Inventory::from_entries(vec![Entry::file("a.txt", "h1"), Entry::directory("img")])
    }

    fn remote() -> Inventory {
        Inventory::from_entries(vec![Entry::file("a.txt", "h0"), Entry::file("old.txt", "h2")])
    }

    #[test]
    fn test_diff_changed_new_and_removed() {
        let result = diff(&local(), &remote(), true, TransportKind::Sftp);
        assert_eq!(result.to_remove, vec![Target::file("old.txt")]);
        assert_eq!(
            result.to_upload,
            vec![Target::file("a.txt"), Target::directory("img")]
        );
    }

    #[test]
    fn test_directory_incapable_transport_drops_directories() {
        let result = diff(&local(), &remote(), true, TransportKind::S3);
        assert_eq!(result.to_remove, vec![Target::file("old.txt")]);
        assert_eq!(result.to_upload, vec![Target::file("a.txt")]);
    }

    #[test]
    fn test_unusable_remote_forces_full_upload_without_removals() {
        let result = diff(&local(), &remote(), false, TransportKind::Sftp);
        assert!(result.to_remove.is_empty());
        assert_eq!(result.to_upload.len(), 2);
    }

    #[test]
    fn test_identical_inventories_produce_empty_diff() {
        let inventory = Inventory::from_entries(vec![
            Entry::directory("css"),
            Entry::file("css/site.css", "c1"),
            Entry::file("index.html", "i1"),
        ]);
        let result = diff(&inventory, &inventory.clone(), true, TransportKind::Ftp);
        assert!(result.is_empty());
    }

    #[test]
    fn test_existing_directory_is_not_reuploaded() {
        let local = Inventory::from_entries(vec![Entry::directory("img")]);
        let remote = Inventory::from_entries(vec![Entry::directory("img")]);
        assert!(diff(&local, &remote, true, TransportKind::Sftp).is_empty());
    }

    #[test]
    fn test_remote_directories_not_removed_for_object_storage() {
        let local = Inventory::new();
        let remote = Inventory::from_entries(vec![
            Entry::directory("img"),
            Entry::file("img/a.png", "x"),
        ]);
        let result = diff(&local, &remote, true, TransportKind::GoogleCloud);
        assert_eq!(result.to_remove, vec![Target::file("img/a.png")]);
    }

    #[test]
    fn test_rename_is_remove_plus_upload() {
        let local = Inventory::from_entries(vec![Entry::file("new.html", "same")]);
        let remote = Inventory::from_entries(vec![Entry::file("old.html", "same")]);
        let result = diff(&local, &remote, true, TransportKind::Sftp);
        assert_eq!(result.to_remove, vec![Target::file("old.html")]);
        assert_eq!(result.to_upload, vec![Target::file("new.html")]);
    }

    #[test]
    fn test_kind_change_removes_then_uploads() {
        let local = Inventory::from_entries(vec![Entry::directory("docs")]);
        let remote = Inventory::from_entries(vec![Entry::file("docs", "d")]);
        let result = diff(&local, &remote, true, TransportKind::Sftp);
        assert_eq!(result.to_remove, vec![Target::file("docs")]);
        assert_eq!(result.to_upload, vec![Target::directory("docs")]);
    }
}
