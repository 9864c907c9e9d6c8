use crate::utils::errors::{CertManagerError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Replace `path` atomically: the closure writes the full new content into a
/// sibling temp file, which is flushed, synced and renamed over `path`.
/// Readers only ever see the old or the new file.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    write_atomic_with(path, false, write)
}

/// Atomic replace with a ready buffer
pub fn write_atomic_bytes(path: &Path, data: &[u8]) -> Result<()> {
    write_atomic(path, |w| {
        w.write_all(data)?;
        Ok(())
    })
}

/// Atomic replace for secrets: the temp file is created 0600, so the
/// content is never readable by anyone else, not even briefly.
pub fn write_atomic_private(path: &Path, data: &[u8]) -> Result<()> {
    write_atomic_with(path, true, |w| {
        w.write_all(data)?;
        Ok(())
    })
}

fn write_atomic_with<F>(path: &Path, private: bool, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp = sibling(path, "tmp");
    let result = (|| {
        let file = create_fresh(&tmp, private)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Create `path` as a new file. A leftover from an interrupted run is
/// removed first so the mode below always applies.
fn create_fresh(path: &Path, private: bool) -> std::io::Result<File> {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed stale {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;
    options.open(path)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// A group of files written next to their targets and moved into place
/// together. Until `promote` runs, the targets keep their previous content;
/// anything still staged when the value is dropped is deleted.
#[derive(Debug, Default)]
pub struct StagedFiles {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl StagedFiles {
    /// Durably write `data` to a pending sibling of `target`
    pub fn stage(&mut self, target: &Path, data: &[u8], private: bool) -> Result<()> {
        let pending = sibling(target, "pending");
        // Tracked before writing so a failed write is cleaned up too
        self.staged.push((pending.clone(), target.to_path_buf()));
        write_atomic_with(&pending, private, |w| {
            w.write_all(data)?;
            Ok(())
        })?;
        tracing::debug!("Staged {}", target.display());
        Ok(())
    }

    /// Rename every staged file over its target, in staging order
    pub fn promote(mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut remaining = staged.into_iter();
        while let Some((pending, target)) = remaining.next() {
            if let Err(e) = fs::rename(&pending, &target) {
                self.staged.push((pending, target));
                self.staged.extend(remaining);
                return Err(e.into());
            }
        }
        Ok(())
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        for (pending, _) in self.staged.drain(..) {
            if let Err(e) = remove_if_exists(&pending) {
                tracing::warn!("Could not clean up {}: {e}", pending.display());
            }
        }
    }
}

/// Remove a file, treating "already absent" as success.
/// Returns whether something was actually deleted.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Restrict a file to its owner (0600)
pub fn set_secure_file_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Exclusive advisory lock on a PKI root, held for one issuance or revocation.
/// The lock file is removed when the guard is dropped.
#[derive(Debug)]
pub struct PkiLock {
    path: PathBuf,
}

impl PkiLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                tracing::debug!("Acquired PKI lock {}", path.display());
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(CertManagerError::Config(
                format!(
                    "PKI is locked by another operation; remove {} if no other certmgr is running",
                    path.display()
                ),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for PkiLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to release PKI lock {}: {e}", self.path.display());
        }
    }
}
