//! Content fingerprints for inventory entries.
//!
//! Text-safe files are fingerprinted with the MD5 of their raw bytes.
//! Binary files are fingerprinted with the MD5 of the decimal string of
//! their byte size, not their content. Snapshots published by earlier
//! releases were produced that way and must keep matching, so two binary
//! files of equal length share a fingerprint. This is a known limitation:
//! a same-sized edit to an image is not detected.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};

/// Extensions treated as binary payloads. Shared with the scheduler so a
/// file is classified the same way for hashing and for ordering.
const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "webp", "avif", "bmp", "ico", "tif", "tiff", "heic",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // audio / video
    "mp3", "mp4", "m4a", "m4v", "ogg", "ogv", "wav", "webm", "mov", "avi", "flac",
    // archives and documents
    "zip", "gz", "tgz", "bz2", "xz", "7z", "rar", "tar", "pdf",
    // executables and raw data
    "bin", "exe", "dll", "so", "wasm", "dat",
];

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Whether `path` names a binary payload, judged by its extension.
pub fn is_binary_path(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            BINARY_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// MD5 hex digest of an in-memory buffer.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Fingerprint used for binary files: MD5 of the decimal byte size.
pub fn size_fingerprint(size: u64) -> String {
    md5_hex(size.to_string().as_bytes())
}

/// Fingerprint the file at `path`.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    if is_binary_path(path) {
        let size = std::fs::metadata(path)?.len();
        return Ok(size_fingerprint(size));
    }

    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
