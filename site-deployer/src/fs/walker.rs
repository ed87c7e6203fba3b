//! Local tree inventory.
//!
//! Walks the build output directory and produces an [`Inventory`] of every
//! file and directory under it, with a fingerprint per file. Which entries
//! are listed depends on the capabilities of the active transport.

use std::io::ErrorKind;
use std::path::{Component, Path};

use walkdir::{DirEntry, WalkDir};

use crate::fs::fingerprint::fingerprint_file;
use crate::manifest::{Entry, Inventory, LOCAL_INVENTORY_FILE};
use crate::transport::TransportKind;
use crate::utils::errors::{io_err, Result};

/// Version-control metadata directories, never deployed.
const VCS_DIRS: &[&str] = &[".git", ".svn", ".hg"];

/// Hidden files that are deployed anyway (server-side routing and auth).
const ALLOWED_DOTFILES: &[&str] = &[".htaccess", ".htpasswd"];

/// Options for building an inventory
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Transport the inventory is built for
    pub transport: TransportKind,

    /// Follow symbolic links
    pub follow_links: bool,
}

impl WalkOptions {
    pub fn for_transport(transport: TransportKind) -> Self {
        Self {
            transport,
            follow_links: false,
        }
    }
}

/// Walk `root` and build its inventory.
///
/// Entries are listed in walk order (parents before children, siblings by
/// name). The working inventory file itself is never listed. Any unreadable
/// entry aborts the walk.
///
/// # Example
/// ```no_run
/// use site_deployer::fs::walker::{build_inventory, WalkOptions};
/// use site_deployer::transport::TransportKind;
/// use std::path::Path;
///
/// let inventory = build_inventory(Path::new("output"), &WalkOptions::for_transport(TransportKind::Sftp)).unwrap();
/// println!("Found {} entries", inventory.len());
/// ```
pub fn build_inventory(root: &Path, options: &WalkOptions) -> Result<Inventory> {
    let root_meta = std::fs::metadata(root).map_err(|e| io_err(root, e))?;
    if !root_meta.is_dir() {
        return Err(io_err(
            root,
            std::io::Error::other("input is not a directory"),
        ));
    }

    let mut inventory = Inventory::new();
    let with_dirs = options.transport.supports_directories();
    let with_dotfiles = options.transport.supports_root_dotfiles();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| is_listed(entry, with_dotfiles));

    for entry in walker {
        let entry = entry?;

        if entry.depth() == 1 && entry.file_name() == LOCAL_INVENTORY_FILE {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if relative.to_str().is_none() {
            return Err(io_err(
                entry.path(),
                std::io::Error::new(ErrorKind::InvalidData, "file name is not valid UTF-8"),
            ));
        }
        let Some(path) = relative_path(entry.path(), root) else {
            continue;
        };

        let is_dir = if entry.path_is_symlink() {
            // Symlinks to directories are not followed; broken links are skipped.
            match std::fs::metadata(entry.path()) {
                Ok(target) if target.is_dir() => {
                    if !options.follow_links {
                        tracing::debug!("Skipping directory symlink {}", entry.path().display());
                        continue;
                    }
                    true
                }
                Ok(_) => false,
                Err(_) => {
                    tracing::warn!("Skipping broken symlink {}", entry.path().display());
                    continue;
                }
            }
        } else {
            entry.file_type().is_dir()
        };

        if is_dir {
            if with_dirs {
                inventory.push(Entry::directory(path));
            }
            continue;
        }

        let fingerprint = fingerprint_file(entry.path()).map_err(|e| io_err(entry.path(), e))?;
        inventory.push(Entry::file(path, fingerprint));
    }

    tracing::debug!(
        "Built inventory of {} entries under {}",
        inventory.len(),
        root.display()
    );
    Ok(inventory)
}

/// Whether an entry (and, for directories, its subtree) belongs in the inventory.
fn is_listed(entry: &DirEntry, with_dotfiles: bool) -> bool {
    let name = entry.file_name().to_string_lossy();

    if VCS_DIRS.contains(&name.as_ref()) {
        return false;
    }

    if name.starts_with('.') {
        return with_dotfiles
            && ALLOWED_DOTFILES.contains(&name.as_ref())
            && !entry.file_type().is_dir();
    }

    true
}

/// Forward-slash path of `path` relative to `root`, without any `./` or
/// drive prefix. `None` if `path` is outside `root` or not valid UTF-8.
pub fn relative_path(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_str()?);
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::EntryKind;
    use crate::utils::errors::DeployError;
    use std::fs;
    use tempfile::TempDir;

    fn site() -> std::io::Result<TempDir> {
        let tmp = TempDir::new()?;
        let root = tmp.path();
        fs::create_dir_all(root.join("assets/img"))?;
        fs::create_dir_all(root.join(".git/objects"))?;
        fs::create_dir_all(root.join(".cache"))?;
        fs::write(root.join("index.html"), b"<html></html>")?;
        fs::write(root.join("assets/site.css"), b"body{}")?;
        fs::write(root.join("assets/img/logo.png"), [0u8; 16])?;
        fs::write(root.join(".git/HEAD"), b"ref: refs/heads/main")?;
        fs::write(root.join(".cache/tmp"), b"x")?;
        fs::write(root.join(".DS_Store"), b"x")?;
        fs::write(root.join(".htaccess"), b"Options -Indexes")?;
        fs::write(root.join(".htpasswd"), b"user:hash")?;
        fs::write(root.join(LOCAL_INVENTORY_FILE), b"[]")?;
        Ok(tmp)
    }

    fn paths(inventory: &Inventory) -> Vec<&str> {
        inventory.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_inventory_for_directory_capable_transport() -> Result<()> {
        let tmp = site().unwrap();
        let inventory = build_inventory(tmp.path(), &WalkOptions::for_transport(TransportKind::Sftp))?;

        assert_eq!(
            paths(&inventory),
            vec![
                ".htaccess",
                ".htpasswd",
                "assets",
                "assets/img",
                "assets/img/logo.png",
                "assets/site.css",
                "index.html",
            ]
        );
        for entry in &inventory {
            match entry.kind {
                EntryKind::Directory => assert!(entry.md5.is_none()),
                EntryKind::File => assert!(entry.md5.is_some()),
            }
        }
        Ok(())
    }

    #[test]
    fn test_inventory_for_object_storage_drops_dirs_and_dotfiles() -> Result<()> {
        let tmp = site().unwrap();
        let inventory = build_inventory(tmp.path(), &WalkOptions::for_transport(TransportKind::S3))?;

        assert_eq!(
            paths(&inventory),
            vec!["assets/img/logo.png", "assets/site.css", "index.html"]
        );
        Ok(())
    }

    #[test]
    fn test_binary_entries_use_size_fingerprint() -> Result<()> {
        let tmp = site().unwrap();
        let inventory = build_inventory(tmp.path(), &WalkOptions::for_transport(TransportKind::Local))?;
        let logo = inventory
            .iter()
            .find(|e| e.path == "assets/img/logo.png")
            .unwrap();
        assert_eq!(
            logo.md5.as_deref(),
            Some(crate::fs::fingerprint::size_fingerprint(16).as_str())
        );
        Ok(())
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = build_inventory(
            &tmp.path().join("missing"),
            &WalkOptions::for_transport(TransportKind::Local),
        );
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_name_aborts_the_walk() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("index.html"), b"<html></html>").unwrap();
        fs::write(tmp.path().join(OsStr::from_bytes(b"caf\xe9.html")), b"menu").unwrap();

        let err = build_inventory(tmp.path(), &WalkOptions::for_transport(TransportKind::Local))
            .unwrap_err();
        match err {
            DeployError::Io { path, source } => {
                assert_eq!(source.kind(), ErrorKind::InvalidData);
                assert_eq!(path.file_name(), Some(OsStr::from_bytes(b"caf\xe9.html")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            relative_path(&tmp.path().join(OsStr::from_bytes(b"caf\xe9.html")), tmp.path()),
            None
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_aborts_the_walk() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("a/page.html"), b"x").unwrap();
        std::os::unix::fs::symlink(tmp.path(), tmp.path().join("a/up")).unwrap();

        let options = WalkOptions {
            transport: TransportKind::Local,
            follow_links: true,
        };
        let result = build_inventory(tmp.path(), &options);
        assert!(matches!(result, Err(DeployError::Walk(_))));
        assert!(!tmp.path().join(LOCAL_INVENTORY_FILE).exists());
    }

    #[test]
    fn test_relative_path_normalization() {
        let root = Path::new("/srv/out");
        assert_eq!(
            relative_path(Path::new("/srv/out/a/b.txt"), root).as_deref(),
            Some("a/b.txt")
        );
        assert_eq!(relative_path(root, root), None);
        assert_eq!(relative_path(Path::new("/elsewhere/x"), root), None);
    }
}
