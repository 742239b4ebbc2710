//! File readers.
//!
//! Every reader decodes one resolved file into chunks of rows holding only the projected
//! columns, and reports the file's full column list so callers can validate references to
//! columns that were pruned.
//!
//! Delimited and JSON-lines files carry no schema. Their columns and types come from the
//! first `batch_size` records; later records are decoded as they are pulled and must fit
//! what that window established.

mod delimited;
mod json_lines;
mod parquet_file;

use std::fs::File;

use tabplan_expr::Value;

use crate::error::{Result, SourceError};
use crate::resolve::FileRef;
use crate::retry::{with_retry, RetryConfig};
use crate::schema::{Field, Projection};
use crate::store::FileStore;

pub const DEFAULT_BATCH_SIZE: usize = 8192;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelimitedOptions {
    pub delimiter: u8,
    /// Whether the first record names the columns. Otherwise columns are `Column1..N`.
    pub header: bool,
    /// Infer `Int`/`Float`/`Boolean` columns; when off every column is a string.
    pub infer_column_types: bool,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            header: true,
            infer_column_types: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Parquet,
    Delimited(DelimitedOptions),
    JsonLines,
}

impl FileFormat {
    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::Parquet => "parquet",
            FileFormat::Delimited(_) => "delimited",
            FileFormat::JsonLines => "json_lines",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ReadOptions {
    /// Rows per decoded chunk.
    pub batch_size: usize,
    pub retry: RetryConfig,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

pub type Rows = Vec<Vec<Value>>;

type Chunks = Box<dyn Iterator<Item = Result<Rows>> + Send>;

/// An open file, yielding its projected rows chunk by chunk.
pub struct FileReader {
    source_columns: Vec<String>,
    fields: Vec<Field>,
    chunks: Chunks,
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("source_columns", &self.source_columns)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl FileReader {
    pub(crate) fn new(source_columns: Vec<String>, fields: Vec<Field>, chunks: Chunks) -> Self {
        Self {
            source_columns,
            fields,
            chunks,
        }
    }

    /// Every column the file has, projected or not, in file order.
    pub fn source_columns(&self) -> &[String] {
        &self.source_columns
    }

    /// The decoded columns; each row yielded has one value per field.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

impl Iterator for FileReader {
    type Item = Result<Rows>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next()
    }
}

/// Open `file` and start decoding the columns `projection` asks for.
pub fn open_reader(
    store: &dyn FileStore,
    file: &FileRef,
    format: &FileFormat,
    projection: &Projection,
    options: &ReadOptions,
) -> Result<FileReader> {
    let handle = open_file(store, file, &options.retry)?;
    let batch_size = options.batch_size.max(1);
    log::debug!("reading {} as {}", file.path.display(), format.name());
    match format {
        FileFormat::Parquet => parquet_file::read(&file.path, handle, projection, batch_size),
        FileFormat::Delimited(delimited) => {
            delimited::read(&file.path, handle, delimited, projection, batch_size)
        }
        FileFormat::JsonLines => json_lines::read(&file.path, handle, projection, batch_size),
    }
}

fn open_file(store: &dyn FileStore, file: &FileRef, retry: &RetryConfig) -> Result<File> {
    with_retry(retry, "open", &file.path, || store.open(&file.path))
        .map_err(|err| SourceError::io(&file.path, err))
}

/// Yield the rows types were inferred from as one chunk, then `rest` in chunks of
/// `batch_size`.
pub(crate) fn streamed_chunks(
    window: Rows,
    rest: impl Iterator<Item = Result<Vec<Value>>> + Send + 'static,
    batch_size: usize,
) -> Chunks {
    let mut window = (!window.is_empty()).then_some(window);
    let mut rest = rest.fuse();
    Box::new(std::iter::from_fn(move || {
        if let Some(rows) = window.take() {
            return Some(Ok(rows));
        }
        let mut chunk = Vec::with_capacity(batch_size);
        for row in rest.by_ref().take(batch_size) {
            match row {
                Ok(row) => chunk.push(row),
                Err(err) => return Some(Err(err)),
            }
        }
        (!chunk.is_empty()).then_some(Ok(chunk))
    }))
}
