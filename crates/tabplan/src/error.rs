use std::io;
use std::path::PathBuf;

use tabplan_expr::ExprError;
use tabplan_source::{PatternError, SourceError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("no files matched {patterns:?}")]
    NoFilesMatched { patterns: Vec<String> },

    /// A builder or constructor was called with structurally invalid arguments.
    #[error("invalid argument to `{operation}`: {reason}")]
    InvalidArgument {
        operation: &'static str,
        reason: String,
    },

    #[error("expression error: {0}")]
    Expression(#[from] ExprError),

    /// A step referenced a column that is absent from (or clashes with) the current schema.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("cannot convert {value} in column `{column}` to {target}")]
    Conversion {
        column: String,
        value: String,
        target: &'static str,
    },

    #[error("invalid artifact at `{key}`: {reason}")]
    InvalidArtifact { key: String, reason: String },

    #[error("artifact not found: {reference}")]
    ArtifactNotFound { reference: String },

    #[error("destination already exists: {}", path.display())]
    DestinationExists { path: PathBuf },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// Materialization failure with the step and source position that triggered it.
    #[error("step {step} ({kind}) failed on {}{}: {source}", file.display(), row_suffix(row))]
    AtRow {
        step: usize,
        kind: &'static str,
        file: PathBuf,
        /// Zero-based row index within the file, when the failure is tied to a row.
        row: Option<usize>,
        #[source]
        source: Box<Error>,
    },
}

fn row_suffix(row: &Option<usize>) -> String {
    row.map(|row| format!(" row {row}")).unwrap_or_default()
}

impl Error {
    pub(crate) fn invalid_artifact(key: impl Into<String>, reason: impl ToString) -> Self {
        Error::InvalidArtifact {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Report a construction failure as a problem with the artifact entry `key`.
    pub(crate) fn in_artifact(self, key: &str) -> Self {
        match self {
            Error::InvalidArgument { reason, .. } => Error::invalid_artifact(key, reason),
            other => Error::invalid_artifact(key, other),
        }
    }

    /// Whether retrying the failed operation could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Io { source, .. } | Error::Write { source, .. } => {
                tabplan_source::is_transient(source)
            }
            Error::AtRow { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The innermost error, with any row context removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::AtRow { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Pattern(err) => Error::Pattern(err),
            SourceError::NoFilesMatched { patterns } => Error::NoFilesMatched { patterns },
            SourceError::Io { path, source } => Error::Io { path, source },
            SourceError::Decode { path, reason } => Error::Decode { path, reason },
        }
    }
}
