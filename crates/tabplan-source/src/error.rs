use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Malformed path patterns or partition templates. Raised when a plan is built.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("empty path pattern")]
    Empty,
    #[error("unsupported scheme in `{0}`: only local paths and file:// URIs can be resolved")]
    UnsupportedScheme(String),
    #[error("recursive wildcard `**` in `{0}`; declare a folder path to read a directory recursively")]
    RecursiveWildcard(String),
    #[error("invalid wildcard segment `{segment}` in `{pattern}`: {reason}")]
    InvalidGlob {
        pattern: String,
        segment: String,
        reason: String,
    },
    #[error("invalid partition format `{format}`: {reason}")]
    InvalidPartitionFormat { format: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("no files matched {patterns:?}")]
    NoFilesMatched { patterns: Vec<String> },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
}

impl SourceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SourceError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SourceError::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;
