//! Filesystem helpers for arqvist
//!
//! Hashing, `lstat`-based metadata extraction and path normalisation. All
//! functions are thread-safe and are called concurrently from the hashing
//! pool.

use crate::error::{ArqvistError, Result};
use crate::types::EntryType;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path};
use std::time::SystemTime;

/// Read buffer for content hashing; sequencing files are large
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hash a file's content using SHA-256
///
/// Streams the file through a fixed buffer, so memory use does not depend on
/// file size. Returns the digest as 64 lowercase hex characters.
///
/// # Errors
///
/// - [`ArqvistError::Io`] if the file cannot be opened or read
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash arbitrary data using SHA-256
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Metadata of one entry, read without following symlinks
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Entry type
    pub entry_type: EntryType,
    /// Size in bytes as reported by `lstat`
    pub size: u64,
    /// Mode bits (`st_mode & 0o7777`)
    pub permissions: u32,
    /// Numeric owner id
    pub owner: u32,
    /// Numeric group id
    pub group: u32,
    /// Last modification time
    pub modified: SystemTime,
}

/// Get entry metadata with `symlink_metadata`
///
/// # Errors
///
/// - [`ArqvistError::Io`] if the entry doesn't exist or cannot be stat'ed
pub fn get_file_metadata(path: &Path) -> Result<FileMetadata> {
    let metadata = fs::symlink_metadata(path)?;
    let file_type = metadata.file_type();

    let entry_type = if file_type.is_symlink() {
        EntryType::Symlink
    } else if file_type.is_dir() {
        EntryType::Directory
    } else if file_type.is_file() {
        EntryType::File
    } else {
        EntryType::Other
    };

    let (owner, group) = get_ownership(&metadata);

    Ok(FileMetadata {
        entry_type,
        size: metadata.len(),
        permissions: get_permissions(&metadata),
        owner,
        group,
        modified: metadata.modified()?,
    })
}

/// Get Unix permission bits from metadata
#[cfg(unix)]
fn get_permissions(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

/// Get permissions from metadata (non-Unix implementation)
#[cfg(not(unix))]
fn get_permissions(metadata: &fs::Metadata) -> u32 {
    let mut mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    if metadata.is_dir() {
        mode |= 0o111;
    }
    mode
}

/// Get numeric owner and group
#[cfg(unix)]
fn get_ownership(metadata: &fs::Metadata) -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (metadata.uid(), metadata.gid())
}

/// Ownership is not tracked on non-Unix platforms
#[cfg(not(unix))]
fn get_ownership(_metadata: &fs::Metadata) -> (u32, u32) {
    (0, 0)
}

/// Read a symlink target verbatim, without resolving it
pub fn read_symlink_target(path: &Path) -> Result<String> {
    let target = fs::read_link(path)?;
    target
        .into_os_string()
        .into_string()
        .map_err(|raw| ArqvistError::PathConversion(raw.into()))
}

/// Make `path` relative to `base` and render it with `/` separators
///
/// Only a lexical strip is attempted so symlinked components are never
/// resolved. Returns an empty string for `base` itself.
///
/// # Errors
///
/// - [`ArqvistError::PathConversion`] if `path` is outside `base`, contains
///   non-normal components, or is not valid UTF-8
pub fn to_relative_posix(path: &Path, base: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| ArqvistError::PathConversion(path.to_path_buf()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| ArqvistError::PathConversion(path.to_path_buf()))?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => return Err(ArqvistError::PathConversion(path.to_path_buf())),
        }
    }

    Ok(parts.join("/"))
}

/// Best-effort relative form of `path` for error reports
///
/// Never fails: non-UTF-8 bytes are replaced with U+FFFD, and a path
/// outside `base` is returned whole.
pub fn to_relative_lossy(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Format bytes in human-readable form (binary units)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
