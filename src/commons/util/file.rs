use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use bytes::Bytes;
use log::trace;
use secrecy::{SecretString, SecretVec};

use crate::commons::error::IoError;

/// Reads a file to Bytes
pub fn read(path: &Path) -> Result<Bytes, IoError> {
    let bytes = fs::read(path).map_err(|e| IoError::new(format!("Could not read: '{}'", path.display()), e))?;
    Ok(Bytes::from(bytes))
}

/// Reads a file holding secret material.
///
/// The content goes straight into a zeroizing buffer and never into a
/// plain `Vec` that could outlive the caller.
pub fn read_secret(path: &Path) -> Result<SecretVec<u8>, IoError> {
    let bytes = fs::read(path).map_err(|e| IoError::new(format!("Could not read: '{}'", path.display()), e))?;
    Ok(SecretVec::new(bytes))
}

/// Reads a passphrase from a file.
///
/// The entire content of the file is the passphrase, minus one trailing
/// line ending.
pub fn read_passphrase(path: &Path) -> Result<SecretString, IoError> {
    let mut content = fs::read_to_string(path)
        .map_err(|e| IoError::new(format!("Could not read password file: '{}'", path.display()), e))?;
    if content.ends_with('\n') {
        content.pop();
        if content.ends_with('\r') {
            content.pop();
        }
    }
    Ok(SecretString::new(content))
}

/// Saves a file atomically.
///
/// The content is written to a temporary file in the target directory,
/// which is then renamed over the target. Readers see either the old file
/// or the complete new one. Unless `force` is set, an existing file is left
/// alone and an error is returned. If `private` is set, the file is only
/// readable by its owner.
pub fn save_atomic(content: &[u8], full_path: &Path, force: bool, private: bool) -> Result<(), IoError> {
    if !force && full_path.exists() {
        return Err(IoError::new(
            format!("Will not overwrite existing file: '{}'", full_path.display()),
            io::Error::from(io::ErrorKind::AlreadyExists),
        ));
    }

    let dir = match full_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        trace!("Creating path: {}", dir.display());
        fs::create_dir_all(dir)
            .map_err(|e| IoError::new(format!("Could not create dir path for: '{}'", dir.display()), e))?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| IoError::new(format!("Could not create temporary file in: '{}'", dir.display()), e))?;

    set_permissions(tmp.as_file(), private)
        .map_err(|e| IoError::new(format!("Could not set permissions for: '{}'", full_path.display()), e))?;

    tmp.write_all(content)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| IoError::new(format!("Could not write to: '{}'", full_path.display()), e))?;

    tmp.persist(full_path)
        .map_err(|e| IoError::new(format!("Could not replace: '{}'", full_path.display()), e.error))?;

    trace!("Saved file: {}", full_path.display());
    Ok(())
}

// Temporary files start out as 0600.
#[cfg(unix)]
fn set_permissions(file: &fs::File, private: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if private { 0o600 } else { 0o644 };
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_file: &fs::File, _private: bool) -> io::Result<()> {
    Ok(())
}
