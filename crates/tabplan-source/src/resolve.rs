use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SourceError};
use crate::pattern::{has_wildcard, GlobSegment, PathPattern};
use crate::retry::{with_retry, RetryConfig};
use crate::store::{EntryKind, FileStore};

/// A concrete file matched by one of a plan's path patterns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub path: PathBuf,
    /// Index of the first pattern that matched this file.
    pub pattern_index: usize,
}

impl FileRef {
    /// The path with `/` separators, which partition templates are matched against.
    pub fn display_path(&self) -> String {
        let text = self.path.to_string_lossy();
        if std::path::MAIN_SEPARATOR == '/' {
            text.into_owned()
        } else {
            text.replace(std::path::MAIN_SEPARATOR, "/")
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ResolveOptions {
    /// Accept a plan whose patterns match no file at all.
    pub allow_empty: bool,
    pub retry: RetryConfig,
}

/// Expand `patterns` into the ordered, de-duplicated list of files they match.
///
/// Files are ordered by pattern index and then lexicographically by path; a file matched by
/// several patterns is reported once, for the first of them. Relative patterns are joined
/// onto `base`.
pub fn resolve(
    store: &dyn FileStore,
    base: &Path,
    patterns: &[PathPattern],
    options: &ResolveOptions,
) -> Result<Vec<FileRef>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (pattern_index, pattern) in patterns.iter().enumerate() {
        pattern.validate()?;
        let local = pattern.local_path()?;
        let full = base.join(local);

        let mut matched = match pattern {
            PathPattern::File(_) => resolve_file(store, &full, &options.retry)?,
            PathPattern::Folder(_) => resolve_folder(store, &full, &options.retry)?,
            PathPattern::Pattern(raw) => resolve_glob(store, raw, &full, &options.retry)?,
        };
        matched.sort_by_cached_key(|p| p.to_string_lossy().into_owned());
        log::debug!("{pattern} matched {} file(s)", matched.len());

        for path in matched {
            if seen.insert(path.clone()) {
                out.push(FileRef {
                    path,
                    pattern_index,
                });
            }
        }
    }

    if out.is_empty() && !options.allow_empty {
        return Err(SourceError::NoFilesMatched {
            patterns: patterns.iter().map(ToString::to_string).collect(),
        });
    }
    Ok(out)
}

fn entry_kind(store: &dyn FileStore, path: &Path, retry: &RetryConfig) -> Result<Option<EntryKind>> {
    with_retry(retry, "stat", path, || store.entry_kind(path)).map_err(|err| SourceError::io(path, err))
}

/// List `dir`, treating a missing directory as empty.
///
/// Stores skip entries that vanish mid-listing, so `NotFound` here means `dir` itself.
fn list_dir(
    store: &dyn FileStore,
    dir: &Path,
    retry: &RetryConfig,
) -> Result<Vec<crate::store::DirEntry>> {
    match with_retry(retry, "list", dir, || store.list_dir(dir)) {
        Ok(entries) => Ok(entries),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(SourceError::io(dir, err)),
    }
}

fn resolve_file(store: &dyn FileStore, path: &Path, retry: &RetryConfig) -> Result<Vec<PathBuf>> {
    match entry_kind(store, path, retry)? {
        Some(EntryKind::File) => Ok(vec![path.to_path_buf()]),
        Some(EntryKind::Dir) => {
            log::warn!("file pattern {} names a directory; declare it as a folder", path.display());
            Ok(Vec::new())
        }
        None => Ok(Vec::new()),
    }
}

fn resolve_folder(store: &dyn FileStore, dir: &Path, retry: &RetryConfig) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let canonical = store.canonicalize(&dir).unwrap_or_else(|_| dir.clone());
        if !visited.insert(canonical) {
            log::debug!("skipping {}: directory already listed", dir.display());
            continue;
        }
        for entry in list_dir(store, &dir, retry)? {
            let path = dir.join(&entry.name);
            match entry.kind {
                EntryKind::File => out.push(path),
                EntryKind::Dir => pending.push(path),
            }
        }
    }
    Ok(out)
}

fn resolve_glob(
    store: &dyn FileStore,
    raw: &str,
    full: &Path,
    retry: &RetryConfig,
) -> Result<Vec<PathBuf>> {
    // Split into the literal directory prefix and the segments that follow the first wildcard.
    let mut root = PathBuf::new();
    let mut segments = Vec::new();
    for component in full.components() {
        if component == Component::CurDir {
            continue;
        }
        let part = component.as_os_str().to_string_lossy();
        let is_wildcard = matches!(component, Component::Normal(_)) && has_wildcard(&part);
        if segments.is_empty() && !is_wildcard {
            root.push(component.as_os_str());
        } else {
            segments.push(GlobSegment::parse(raw, &part)?);
        }
    }

    if segments.is_empty() {
        return resolve_file(store, &root, retry);
    }
    if root.as_os_str().is_empty() {
        root.push(".");
    }

    let mut candidates = vec![root];
    let last = segments.len() - 1;
    for (idx, segment) in segments.iter().enumerate() {
        let wanted = if idx == last { EntryKind::File } else { EntryKind::Dir };
        let mut next = Vec::new();
        for dir in &candidates {
            for entry in list_dir(store, dir, retry)? {
                if entry.kind == wanted && segment.matches(&entry.name) {
                    next.push(dir.join(&entry.name));
                }
            }
        }
        if next.is_empty() {
            return Ok(Vec::new());
        }
        candidates = next;
    }
    Ok(candidates)
}
