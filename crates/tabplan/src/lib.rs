//! Lazy, reloadable table plans.
//!
//! A [`Table`] is an immutable list of [`Step`]s: a file read followed by sampling,
//! filtering, column selection, partition extraction and type conversion. Tables are saved
//! as a small YAML artifact (`MLTable`) that can be loaded elsewhere and materialized into
//! the same rows.
//!
//! ```no_run
//! use tabplan::{PathPattern, SaveOptions, Table};
//!
//! # fn main() -> tabplan::Result<()> {
//! let table = Table::from_parquet_files([PathPattern::pattern(
//!     "green/puYear=2015/puMonth=*/*.parquet",
//! )])?
//! .take_random_sample(0.001, Some(735))?
//! .filter("tripDistance > 0")?
//! .extract_columns_from_partition_format("/puYear={year}/puMonth={month}")?;
//!
//! table.save("green-sample", &SaveOptions::default())?;
//! let reloaded = Table::load("green-sample")?;
//! println!("{}", reloaded.show(5)?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod artifact;
mod engine;
mod error;
mod materialized;
mod step;
mod table;

pub use crate::artifact::{ArtifactResolver, LocalResolver, SaveOptions, ARTIFACT_FILE_NAME};
pub use crate::engine::{default_engine, Engine, EngineConfig};
pub use crate::error::{Error, Result};
pub use crate::materialized::MaterializedTable;
pub use crate::step::{Step, TypeConversion, DEFAULT_DATETIME_FORMATS, PATH_COLUMN};
pub use crate::table::Table;

pub use tabplan_expr::{ColumnType, Expr, ExprError, Value};
pub use tabplan_source::{
    DelimitedOptions, Field, FileFormat, FileRef, FileStore, LocalFileStore, PartitionTemplate,
    PartitionTyping, PathPattern, PatternError, RetryConfig,
};
