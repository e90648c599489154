//! Filesystem primitives shared by transactions and the transform backend.
//!
//! Every write that replaces user data goes through [`write_atomically`]:
//! content is written to a hidden `.imgslim-*.part` sibling, synced, given the
//! permissions of the file it replaces, and renamed over the target. A process
//! killed mid-write leaves at worst a stray `.part` file, never a truncated
//! image.
//!
//! Errors carry the operation name and the path involved so a failed
//! transaction can say exactly what went wrong.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{operation} failed for {}: {source}", .path.display())]
pub struct FsError {
    pub operation: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl FsError {
    pub fn io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        Self {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

const TEMP_PREFIX: &str = ".imgslim-";
const TEMP_SUFFIX: &str = ".part";

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Create every missing directory above `path`.
pub fn ensure_parent(path: &Path) -> FsResult<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|e| FsError::io("create_dir_all", dir, e))
}

pub fn file_size(path: &Path) -> FsResult<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| FsError::io("stat", path, e))
}

pub fn modified_time(path: &Path) -> FsResult<SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| FsError::io("stat.modified", path, e))
}

/// Reset the modification time of `path`.
///
/// Tries a writable handle first (required on Windows), then falls back to a
/// read-only one, which is enough for the file's owner on Unix.
pub fn set_modified_time(path: &Path, time: SystemTime) -> FsResult<()> {
    let file = File::options()
        .write(true)
        .open(path)
        .or_else(|_| File::open(path))
        .map_err(|e| FsError::io("open.set_modified", path, e))?;
    file.set_modified(time)
        .map_err(|e| FsError::io("set_modified", path, e))
}

pub fn remove_file(path: &Path) -> FsResult<()> {
    fs::remove_file(path).map_err(|e| FsError::io("remove_file", path, e))
}

/// Write `target` through a temp sibling and an atomic rename.
///
/// The new file takes the permissions of the file it replaces, or of
/// `template` when `target` does not exist yet. Returns the final size.
pub fn write_atomically<E, F>(target: &Path, template: &Path, write: F) -> Result<u64, E>
where
    E: From<FsError>,
    F: FnOnce(&mut File) -> Result<(), E>,
{
    let dir = parent_dir(target);
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| FsError::io("create_temp", dir, e))?;

    write(tmp.as_file_mut())?;

    tmp.as_file()
        .sync_all()
        .map_err(|e| FsError::io("sync", tmp.path(), e))?;

    let perms_source = if target.exists() { target } else { template };
    if let Ok(meta) = fs::metadata(perms_source) {
        fs::set_permissions(tmp.path(), meta.permissions())
            .map_err(|e| FsError::io("set_permissions", tmp.path(), e))?;
    }

    let size = tmp
        .as_file()
        .metadata()
        .map(|m| m.len())
        .map_err(|e| FsError::io("stat", tmp.path(), e))?;

    tmp.persist(target)
        .map_err(|e| FsError::io("persist", target, e.error))?;
    Ok(size)
}

/// Atomically replace `to` with a byte-exact copy of `from`.
pub fn replace_atomically(from: &Path, to: &Path) -> FsResult<u64> {
    write_atomically(to, from, |file| {
        let mut src = File::open(from).map_err(|e| FsError::io("open", from, e))?;
        io::copy(&mut src, file).map_err(|e| FsError::io("copy", from, e))?;
        Ok(())
    })
}

/// Byte-exact copy that also carries over the modification time.
///
/// Missing parent directories of `to` are created. Used for backups, so the
/// copy is atomic as well: a half-written backup never exists under its
/// final name.
pub fn copy_file(from: &Path, to: &Path) -> FsResult<u64> {
    ensure_parent(to)?;
    let size = replace_atomically(from, to)?;
    let mtime = modified_time(from)?;
    set_modified_time(to, mtime)?;
    Ok(size)
}

/// Move `from` over `to`, consuming `from`.
///
/// A plain rename when both live on the same filesystem; otherwise an atomic
/// copy followed by deleting `from`.
pub fn move_over(from: &Path, to: &Path) -> FsResult<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                error = %err,
                "rename failed, falling back to copy"
            );
            replace_atomically(from, to)?;
            remove_file(from)
        }
    }
}
