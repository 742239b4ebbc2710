//! Data sources for tabplan: path patterns, file resolution against a [`FileStore`],
//! partition templates and decoders for Parquet, delimited text and JSON lines files.

#![forbid(unsafe_code)]

mod error;
mod partition;
mod pattern;
mod reader;
mod resolve;
mod retry;
mod schema;
mod store;

pub use crate::error::{PatternError, Result, SourceError};
pub use crate::partition::{
    infer_partition_type, partition_value, PartitionTemplate, PartitionTyping,
};
pub use crate::pattern::PathPattern;
pub use crate::reader::{
    open_reader, DelimitedOptions, FileFormat, FileReader, ReadOptions, Rows, DEFAULT_BATCH_SIZE,
};
pub use crate::resolve::{resolve, FileRef, ResolveOptions};
pub use crate::retry::{is_transient, RetryConfig};
pub use crate::schema::{Field, Projection};
pub use crate::store::{DirEntry, EntryKind, FileStore, LocalFileStore};
