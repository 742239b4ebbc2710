use std::fmt;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};

use crate::error::PatternError;

/// A path descriptor of a plan's `ReadFiles` step.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathPattern {
    /// A single file; contributes nothing if it does not exist.
    File(String),
    /// Every file below a directory, recursively.
    Folder(String),
    /// Wildcards (`*`, `?`, `[...]`) that each match within one path component.
    Pattern(String),
}

impl PathPattern {
    pub fn file(path: impl Into<String>) -> Self {
        PathPattern::File(path.into())
    }

    pub fn folder(path: impl Into<String>) -> Self {
        PathPattern::Folder(path.into())
    }

    pub fn pattern(glob: impl Into<String>) -> Self {
        PathPattern::Pattern(glob.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PathPattern::File(_) => "file",
            PathPattern::Folder(_) => "folder",
            PathPattern::Pattern(_) => "pattern",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PathPattern::File(p) | PathPattern::Folder(p) | PathPattern::Pattern(p) => p,
        }
    }

    pub fn with_path(&self, path: String) -> Self {
        match self {
            PathPattern::File(_) => PathPattern::File(path),
            PathPattern::Folder(_) => PathPattern::Folder(path),
            PathPattern::Pattern(_) => PathPattern::Pattern(path),
        }
    }

    /// Check the pattern's syntax without touching the store.
    pub fn validate(&self) -> Result<(), PatternError> {
        let path = local_path(self.as_str())?;
        if let PathPattern::Pattern(pattern) = self {
            for component in path.components() {
                if let Component::Normal(segment) = component {
                    GlobSegment::parse(pattern, &segment.to_string_lossy())?;
                }
            }
        }
        Ok(())
    }

    /// The pattern's path with any `file://` prefix removed.
    pub fn local_path(&self) -> Result<PathBuf, PatternError> {
        local_path(self.as_str())
    }

    pub fn is_relative(&self) -> bool {
        self.local_path().map(|p| p.is_relative()).unwrap_or(false)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.as_str())
    }
}

fn local_path(raw: &str) -> Result<PathBuf, PatternError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PatternError::Empty);
    }
    let stripped = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    if stripped.contains("://") {
        return Err(PatternError::UnsupportedScheme(raw.to_string()));
    }
    if stripped.is_empty() {
        return Err(PatternError::Empty);
    }
    Ok(PathBuf::from(stripped))
}

pub(crate) fn has_wildcard(segment: &str) -> bool {
    segment.contains(['*', '?', '['])
}

/// One component of a wildcard pattern.
#[derive(Clone, Debug)]
pub(crate) enum GlobSegment {
    Literal(String),
    Wildcard(GlobMatcher),
}

impl GlobSegment {
    pub(crate) fn parse(pattern: &str, segment: &str) -> Result<Self, PatternError> {
        if segment.contains("**") {
            return Err(PatternError::RecursiveWildcard(pattern.to_string()));
        }
        if !has_wildcard(segment) {
            return Ok(GlobSegment::Literal(segment.to_string()));
        }
        let glob = GlobBuilder::new(segment)
            .literal_separator(true)
            .build()
            .map_err(|err| PatternError::InvalidGlob {
                pattern: pattern.to_string(),
                segment: segment.to_string(),
                reason: err.kind().to_string(),
            })?;
        Ok(GlobSegment::Wildcard(glob.compile_matcher()))
    }

    pub(crate) fn matches(&self, name: &str) -> bool {
        match self {
            GlobSegment::Literal(literal) => literal == name,
            GlobSegment::Wildcard(matcher) => matcher.is_match(Path::new(name)),
        }
    }
}
