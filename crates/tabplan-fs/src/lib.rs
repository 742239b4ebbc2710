//! Atomic file writes for tabplan artifacts.
//!
//! A write goes to a temp file in the destination directory (avoids cross-device renames),
//! is flushed and synced, and is then moved into place. Readers never observe a partially
//! written artifact, and a failed write leaves any previous file untouched.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// What to do when the destination file already exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with [`io::ErrorKind::AlreadyExists`] if the destination exists.
    CreateNew,
    /// Replace the destination.
    Replace,
}

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` returns `Some("")` for bare relative file names like `MLTable`.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Atomically write `dest` with the contents produced by `write_fn`.
///
/// Parent directories are created as needed. If `write_fn` fails, or `mode` is
/// [`WriteMode::CreateNew`] and `dest` exists, the destination is left untouched.
pub fn atomic_write(
    dest: impl AsRef<Path>,
    mode: WriteMode,
    write_fn: impl FnOnce(&mut File) -> io::Result<()>,
) -> io::Result<()> {
    let dest = dest.as_ref();
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    write_fn(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    match mode {
        WriteMode::CreateNew => tmp.persist_noclobber(dest),
        WriteMode::Replace => tmp.persist(dest),
    }
    .map_err(|err| err.error)?;

    // The file is already in place if syncing the directory fails.
    let _ = sync_parent_dir(dest);
    Ok(())
}

pub fn atomic_write_bytes(dest: impl AsRef<Path>, mode: WriteMode, bytes: &[u8]) -> io::Result<()> {
    atomic_write(dest, mode, |file| file.write_all(bytes))
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    // Opening a directory as a file is not supported everywhere; callers treat this as
    // best-effort.
    File::open(parent_dir_or_dot(path))?.sync_all()
}
