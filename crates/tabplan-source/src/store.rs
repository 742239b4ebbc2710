use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// The backing store file references are resolved against and read from.
///
/// Resolution only needs directory listings and entry kinds; readers only need to open
/// files. Implementations must be safe to call from several reader threads at once.
pub trait FileStore: Send + Sync + fmt::Debug {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>>;

    /// Kind of the entry at `path`, or `None` if nothing exists there.
    fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>>;

    fn open(&self, path: &Path) -> io::Result<File>;

    /// A path naming the same directory as `path` with links resolved, used to detect cycles.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        Ok(path.to_path_buf())
    }
}

/// The local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileStore;

impl FileStore for LocalFileStore {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            // Follow symlinks so linked partitions resolve like regular directories.
            let file_type = match fs::metadata(entry.path()) {
                Ok(meta) => meta.file_type(),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    log::warn!("skipping {}: {err}", entry.path().display());
                    continue;
                }
                Err(err) => return Err(err),
            };
            let kind = if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            out.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        Ok(out)
    }

    fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Dir)),
            Ok(_) => Ok(Some(EntryKind::File)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }
}
