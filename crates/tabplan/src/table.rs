use std::path::{Path, PathBuf};
use std::sync::Arc;

use tabplan_source::{DelimitedOptions, FileFormat, PathPattern};

use crate::artifact::{self, ArtifactResolver, LocalResolver, SaveOptions};
use crate::engine::{default_engine, Engine};
use crate::error::{Error, Result};
use crate::materialized::MaterializedTable;
use crate::step::{Step, TypeConversion};

/// An immutable, reloadable plan for loading a table.
///
/// Every transformation returns a new `Table` and leaves `self` untouched. Nothing is read
/// until the table is materialized; builders only check their arguments' structure, and
/// anything that depends on the data's schema is reported by [`Table::materialize`].
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    steps: Arc<[Step]>,
    base: Option<PathBuf>,
}

impl Table {
    /// A table reading the files matched by `paths`.
    pub fn from_paths(paths: impl IntoIterator<Item = PathPattern>, format: FileFormat) -> Result<Self> {
        let step = Step::read_files(paths.into_iter().collect(), format, false)?;
        Ok(Self {
            steps: Arc::from(vec![step]),
            base: None,
        })
    }

    /// A table reading the paths in `{file|folder|pattern: path}` records.
    pub fn from_path_records<'a>(
        records: impl IntoIterator<Item = (&'a str, &'a str)>,
        format: FileFormat,
    ) -> Result<Self> {
        let paths = records
            .into_iter()
            .map(|(kind, path)| artifact::path_pattern(kind, path))
            .collect::<Result<Vec<_>>>()
            .map_err(|err| Error::InvalidArgument {
                operation: "from_path_records",
                reason: err.to_string(),
            })?;
        Self::from_paths(paths, format)
    }

    pub fn from_parquet_files(paths: impl IntoIterator<Item = PathPattern>) -> Result<Self> {
        Self::from_paths(paths, FileFormat::Parquet)
    }

    pub fn from_delimited_files(
        paths: impl IntoIterator<Item = PathPattern>,
        options: DelimitedOptions,
    ) -> Result<Self> {
        Self::from_paths(paths, FileFormat::Delimited(options))
    }

    pub fn from_json_lines_files(paths: impl IntoIterator<Item = PathPattern>) -> Result<Self> {
        Self::from_paths(paths, FileFormat::JsonLines)
    }

    /// Parse artifact text. Relative patterns resolve against `base` (the current directory
    /// when `None`).
    pub fn from_artifact_str(text: &str, base: Option<PathBuf>) -> Result<Self> {
        let steps = artifact::deserialize(text)?;
        Ok(Self {
            steps: steps.into(),
            base,
        })
    }

    /// Load a saved table from a directory, an artifact file or a `file://` URI.
    pub fn load(reference: &str) -> Result<Self> {
        artifact::load(reference, &LocalResolver)
    }

    /// Load a saved table through a caller-supplied reference resolver.
    pub fn load_with(reference: &str, resolver: &dyn ArtifactResolver) -> Result<Self> {
        artifact::load(reference, resolver)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Directory relative patterns resolve against, if one was set.
    pub fn base(&self) -> Option<&Path> {
        self.base.as_deref()
    }

    pub fn with_base(&self, base: impl Into<PathBuf>) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
            base: Some(base.into()),
        }
    }

    pub(crate) fn base_dir(&self) -> Result<PathBuf> {
        match &self.base {
            Some(base) if base.is_absolute() => Ok(base.clone()),
            base => {
                let cwd = std::env::current_dir().map_err(|source| Error::Io {
                    path: PathBuf::from("."),
                    source,
                })?;
                Ok(base.as_ref().map(|b| cwd.join(b)).unwrap_or(cwd))
            }
        }
    }

    /// Add a `Path` column holding each row's source file.
    pub fn with_path_column(&self) -> Self {
        let mut steps = self.steps.to_vec();
        if let Some(Step::ReadFiles {
            include_path_column,
            ..
        }) = steps.first_mut()
        {
            *include_path_column = true;
        }
        Self {
            steps: steps.into(),
            base: self.base.clone(),
        }
    }

    fn push(&self, step: Result<Step>) -> Result<Self> {
        let step = step?;
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.extend_from_slice(&self.steps);
        steps.push(step);
        Ok(Self {
            steps: steps.into(),
            base: self.base.clone(),
        })
    }

    /// Keep each row independently with `probability`. Rows drawn for a given seed are the
    /// same on every materialization of an unchanged source.
    pub fn take_random_sample(&self, probability: f64, seed: Option<u64>) -> Result<Self> {
        self.push(Step::random_sample(probability, seed))
    }

    /// Keep the rows for which `predicate` evaluates to true.
    pub fn filter(&self, predicate: &str) -> Result<Self> {
        self.push(Step::filter(predicate))
    }

    pub fn drop_columns<S: Into<String>>(&self, names: impl IntoIterator<Item = S>) -> Result<Self> {
        self.push(Step::drop_columns(names.into_iter().map(Into::into).collect()))
    }

    /// Keep only `names`, in the given order.
    pub fn select_columns<S: Into<String>>(&self, names: impl IntoIterator<Item = S>) -> Result<Self> {
        self.push(Step::select_columns(names.into_iter().map(Into::into).collect()))
    }

    pub fn keep_columns<S: Into<String>>(&self, names: impl IntoIterator<Item = S>) -> Result<Self> {
        self.select_columns(names)
    }

    /// Add the columns captured by a `{name}` template from each file's path.
    pub fn extract_columns_from_partition_format(&self, format: &str) -> Result<Self> {
        self.push(Step::extract_partition_columns(format))
    }

    pub fn convert_column_types<S: Into<String>>(
        &self,
        mapping: impl IntoIterator<Item = (S, TypeConversion)>,
    ) -> Result<Self> {
        self.push(Step::convert_column_types(
            mapping
                .into_iter()
                .map(|(name, conversion)| (name.into(), conversion))
                .collect(),
        ))
    }

    /// Canonical artifact text for this table.
    pub fn to_artifact_string(&self) -> Result<String> {
        artifact::serialize(&self.steps)
    }

    /// Write the artifact (and nothing else) into `dir`. Returns the artifact file's path.
    pub fn save(&self, dir: impl AsRef<Path>, options: &SaveOptions) -> Result<PathBuf> {
        artifact::save(self, dir.as_ref(), options)
    }

    pub fn materialize(&self) -> Result<MaterializedTable> {
        default_engine()?.materialize(self)
    }

    /// The first `limit` rows of the full materialization.
    pub fn materialize_bounded(&self, limit: usize) -> Result<MaterializedTable> {
        default_engine()?.materialize_bounded(self, limit)
    }

    pub fn show(&self, n: usize) -> Result<MaterializedTable> {
        self.materialize_bounded(n)
    }

    pub fn materialize_with(&self, engine: &Engine) -> Result<MaterializedTable> {
        engine.materialize(self)
    }
}
