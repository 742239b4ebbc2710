//! Plan execution.
//!
//! A materialization resolves the plan's files, works out which source columns the steps
//! need, and runs every file through the steps in declaration order. Files are read in
//! windows of `max_concurrent_reads` on the engine's worker pool; output rows are ordered by
//! file and then by position within the file, whatever the scheduling.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rayon::ThreadPool;
use tabplan_expr::{evaluate_predicate, ExprError, Expr, Row, Value};
use tabplan_source::{
    infer_partition_type, open_reader, partition_value, resolve, Field, FileFormat, FileRef,
    FileStore, LocalFileStore, PartitionTemplate, PartitionTyping, Projection, ReadOptions,
    ResolveOptions, RetryConfig, DEFAULT_BATCH_SIZE,
};

use crate::error::{Error, Result};
use crate::materialized::MaterializedTable;
use crate::step::{Step, TypeConversion, PATH_COLUMN};
use crate::table::Table;

const ENV_MAX_CONCURRENT_READS: &str = "TABPLAN_MAX_CONCURRENT_READS";
const ENV_BATCH_SIZE: &str = "TABPLAN_BATCH_SIZE";
const ENV_IO_RETRIES: &str = "TABPLAN_IO_RETRIES";
const ENV_PARTITION_TYPING: &str = "TABPLAN_PARTITION_TYPING";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Files read at the same time.
    pub max_concurrent_reads: usize,
    /// Rows decoded per chunk.
    pub batch_size: usize,
    pub retry: RetryConfig,
    pub partition_typing: PartitionTyping,
    /// Materialize an empty table instead of failing when no file matches.
    pub allow_empty: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reads: default_concurrency(),
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryConfig::default(),
            partition_typing: PartitionTyping::default(),
            allow_empty: false,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

impl EngineConfig {
    /// Defaults overridden by `TABPLAN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_READS) {
            self.max_concurrent_reads = parse_setting(ENV_MAX_CONCURRENT_READS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            self.batch_size = parse_setting(ENV_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_IO_RETRIES) {
            self.retry.max_retries = parse_setting(ENV_IO_RETRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PARTITION_TYPING) {
            self.partition_typing = parse_setting(ENV_PARTITION_TYPING, &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidArgument {
            operation: "configuration",
            reason: reason.to_string(),
        };
        if self.max_concurrent_reads == 0 {
            return Err(invalid("max_concurrent_reads must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be at least 1"));
        }
        Ok(())
    }
}

fn parse_setting<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|err| Error::InvalidArgument {
        operation: "configuration",
        reason: format!("{key}={raw:?}: {err}"),
    })
}

static DEFAULT_ENGINE: OnceLock<Engine> = OnceLock::new();

/// The process-wide engine used by [`Table::materialize`], configured from the environment
/// on first use.
pub fn default_engine() -> Result<&'static Engine> {
    if let Some(engine) = DEFAULT_ENGINE.get() {
        return Ok(engine);
    }
    let config = EngineConfig::from_env()?;
    Ok(DEFAULT_ENGINE.get_or_init(|| Engine::new(config)))
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn FileStore>,
    /// `None` when reads run on the calling thread.
    pool: Option<ThreadPool>,
}

fn build_pool(threads: usize) -> Option<ThreadPool> {
    if threads <= 1 {
        return None;
    }
    let built = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|idx| format!("tabplan-read-{idx}"))
        .build();
    match built {
        Ok(pool) => Some(pool),
        Err(err) => {
            log::warn!("could not start {threads} reader threads ({err}); reading sequentially");
            None
        }
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(LocalFileStore))
    }

    /// An engine resolving and reading files through `store`.
    pub fn with_store(config: EngineConfig, store: Arc<dyn FileStore>) -> Self {
        let pool = build_pool(config.max_concurrent_reads);
        Self {
            config,
            store,
            pool,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The files `table` reads, in output order.
    pub fn resolve_files(&self, table: &Table) -> Result<Vec<FileRef>> {
        let (paths, _, _) = read_step(table)?;
        let base = table.base_dir()?;
        let options = ResolveOptions {
            allow_empty: self.config.allow_empty,
            retry: self.config.retry,
        };
        Ok(resolve(self.store.as_ref(), &base, paths, &options)?)
    }

    pub fn materialize(&self, table: &Table) -> Result<MaterializedTable> {
        self.run(table, None)
    }

    /// The first `limit` rows of `table`'s full materialization. Files after the ones that
    /// supply those rows are not read.
    pub fn materialize_bounded(&self, table: &Table, limit: usize) -> Result<MaterializedTable> {
        self.run(table, Some(limit))
    }

    fn run(&self, table: &Table, limit: Option<usize>) -> Result<MaterializedTable> {
        let (_, format, include_path_column) = read_step(table)?;
        let files = self.resolve_files(table)?;
        let plan = Plan::new(table.steps(), format, include_path_column, &files, &self.config)?;
        log::debug!(
            "materializing {} file(s) with projection {:?}",
            files.len(),
            plan.projection
        );

        let window = self.config.max_concurrent_reads.max(1);
        let mut outputs = Vec::with_capacity(files.len());
        let mut produced = 0;
        for (window_idx, batch) in files.chunks(window).enumerate() {
            // The first window is always read so the preview carries a schema.
            if !outputs.is_empty() && limit.is_some_and(|limit| produced >= limit) {
                log::debug!(
                    "row limit reached after {} of {} file(s)",
                    outputs.len(),
                    files.len()
                );
                break;
            }
            let first = window_idx * window;
            let read = |(offset, file): (usize, &FileRef)| {
                self.read_file(&plan, first + offset, file, limit)
            };
            let results: Vec<Result<FileOutput>> = match &self.pool {
                Some(pool) if batch.len() > 1 => {
                    pool.install(|| batch.par_iter().enumerate().map(read).collect())
                }
                _ => batch.iter().enumerate().map(read).collect(),
            };
            for result in results {
                let output = result?;
                produced += output.rows.len();
                outputs.push(output);
            }
        }

        let mut result = union(outputs, &files)?;
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        log::info!(
            "materialized {} row(s) x {} column(s) from {} file(s)",
            result.num_rows(),
            result.num_columns(),
            files.len()
        );
        Ok(result)
    }

    fn read_file(
        &self,
        plan: &Plan<'_>,
        file_index: usize,
        file: &FileRef,
        limit: Option<usize>,
    ) -> Result<FileOutput> {
        let read_kind = plan.steps[0].kind();
        let options = ReadOptions {
            batch_size: self.config.batch_size,
            retry: self.config.retry,
        };
        let reader = open_reader(
            self.store.as_ref(),
            file,
            &plan.format,
            &plan.projection,
            &options,
        )
        .map_err(|err| at(0, read_kind, file, None, err.into()))?;

        let mut schema = Schema::new(reader.fields(), reader.source_columns());
        let mut ops = plan.compile(&mut schema, file_index, file)?;

        let mut rows = Vec::new();
        let mut row_index = 0;
        'chunks: for chunk in reader {
            let chunk = chunk.map_err(|err| at(0, read_kind, file, None, err.into()))?;
            for values in chunk {
                let row = row_index;
                row_index += 1;
                let kept = apply(&mut ops, values)
                    .map_err(|(step, kind, err)| at(step, kind, file, Some(row), err))?;
                if let Some(values) = kept {
                    rows.push(values);
                    if limit.is_some_and(|limit| rows.len() >= limit) {
                        break 'chunks;
                    }
                }
            }
        }
        log::debug!(
            "{}: kept {} of {} row(s)",
            file.path.display(),
            rows.len(),
            row_index
        );
        Ok(FileOutput {
            fields: schema.fields,
            rows,
        })
    }
}

fn read_step(table: &Table) -> Result<(&[tabplan_source::PathPattern], FileFormat, bool)> {
    match table.steps().first() {
        Some(Step::ReadFiles {
            paths,
            format,
            include_path_column,
        }) => Ok((paths, *format, *include_path_column)),
        _ => Err(Error::InvalidArgument {
            operation: "materialize",
            reason: "a plan must start with a read step".into(),
        }),
    }
}

fn at(step: usize, kind: &'static str, file: &FileRef, row: Option<usize>, err: Error) -> Error {
    Error::AtRow {
        step,
        kind,
        file: file.path.clone(),
        row,
        source: Box::new(err),
    }
}

/// Partition columns of one extraction step, with each resolved file's values.
struct PartitionColumns {
    fields: Vec<Field>,
    values: Vec<Vec<Value>>,
}

struct Plan<'a> {
    steps: &'a [Step],
    format: FileFormat,
    include_path_column: bool,
    projection: Projection,
    /// Effective seed of each sampling step, by step index.
    seeds: HashMap<usize, u64>,
    partitions: HashMap<usize, PartitionColumns>,
}

impl<'a> Plan<'a> {
    fn new(
        steps: &'a [Step],
        format: FileFormat,
        include_path_column: bool,
        files: &[FileRef],
        config: &EngineConfig,
    ) -> Result<Self> {
        let mut seeds = HashMap::new();
        let mut partitions = HashMap::new();
        for (idx, step) in steps.iter().enumerate() {
            match step {
                Step::RandomSample { seed, .. } => {
                    let seed = seed.unwrap_or_else(|| {
                        let drawn = rand::random();
                        log::debug!("step {idx}: sampling with drawn seed {drawn}");
                        drawn
                    });
                    seeds.insert(idx, seed);
                }
                Step::ExtractPartitionColumns { format } => {
                    let columns =
                        partition_columns(idx, step.kind(), format, files, config.partition_typing)?;
                    partitions.insert(idx, columns);
                }
                _ => {}
            }
        }
        Ok(Self {
            steps,
            format,
            include_path_column,
            projection: projection(steps.get(1..).unwrap_or_default()),
            seeds,
            partitions,
        })
    }

    /// Check every step against `schema` (updating it as the steps would) and build the
    /// per-row operations for one file.
    fn compile(
        &self,
        schema: &mut Schema,
        file_index: usize,
        file: &FileRef,
    ) -> Result<Vec<CompiledOp<'_>>> {
        let mut ops = Vec::with_capacity(self.steps.len());
        if self.include_path_column {
            let kind = self.steps[0].kind();
            if schema.contains(PATH_COLUMN) {
                let reason = format!("the file already has a `{PATH_COLUMN}` column");
                return Err(at(0, kind, file, None, Error::Schema(reason)));
            }
            schema.fields.push(Field::new(PATH_COLUMN, tabplan_expr::ColumnType::String));
            ops.push(CompiledOp {
                step: 0,
                kind,
                op: Op::Append(vec![Value::from(file.display_path())]),
            });
        }

        for (idx, step) in self.steps.iter().enumerate().skip(1) {
            let kind = step.kind();
            let op = self
                .compile_step(idx, step, schema, file_index)
                .map_err(|err| at(idx, kind, file, None, err))?;
            if let Some(op) = op {
                ops.push(CompiledOp {
                    step: idx,
                    kind,
                    op,
                });
            }
        }
        Ok(ops)
    }

    fn compile_step(
        &self,
        idx: usize,
        step: &'a Step,
        schema: &mut Schema,
        file_index: usize,
    ) -> Result<Option<Op<'a>>> {
        let op = match step {
            Step::ReadFiles { .. } => {
                return Err(Error::Schema("a plan can only have one read step".into()))
            }
            Step::RandomSample { probability, .. } => {
                let seed = self.seeds.get(&idx).copied().unwrap_or_default();
                Op::Sample {
                    probability: *probability,
                    rng: StdRng::seed_from_u64(sample_seed(seed, idx, file_index)),
                }
            }
            Step::Filter { predicate } => {
                for column in predicate.columns() {
                    schema.loaded(column).map_err(|err| match err {
                        Missing::Absent => Error::Expression(ExprError::ColumnNotFound(
                            column.to_string(),
                        )),
                        Missing::Pruned => not_loaded(column),
                    })?;
                }
                Op::Filter {
                    predicate,
                    index: schema.index(),
                }
            }
            Step::DropColumns { names } => {
                for name in names {
                    if !schema.contains(name) {
                        return Err(Error::Schema(format!("cannot drop missing column `{name}`")));
                    }
                }
                let keep: Vec<usize> = (0..schema.fields.len())
                    .filter(|&i| !names.contains(&schema.fields[i].name))
                    .collect();
                schema.pruned.retain(|name| !names.contains(name));
                if keep.len() == schema.fields.len() {
                    return Ok(None);
                }
                schema.project(&keep);
                Op::Project(keep)
            }
            Step::SelectColumns { names } => {
                let mut keep = Vec::with_capacity(names.len());
                for name in names {
                    let pos = schema.loaded(name).map_err(|err| match err {
                        Missing::Absent => {
                            Error::Schema(format!("cannot select missing column `{name}`"))
                        }
                        Missing::Pruned => not_loaded(name),
                    })?;
                    keep.push(pos);
                }
                schema.pruned.clear();
                schema.project(&keep);
                Op::Project(keep)
            }
            Step::ExtractPartitionColumns { .. } => {
                let Some(columns) = self.partitions.get(&idx) else {
                    return Err(Error::Schema("partition columns were not resolved".into()));
                };
                for field in &columns.fields {
                    if schema.contains(&field.name) {
                        return Err(Error::Schema(format!(
                            "partition column `{}` already exists",
                            field.name
                        )));
                    }
                }
                schema.fields.extend(columns.fields.iter().cloned());
                Op::Append(columns.values[file_index].clone())
            }
            Step::ConvertColumnTypes { mapping } => {
                let mut targets = Vec::with_capacity(mapping.len());
                for (name, conversion) in mapping {
                    let pos = schema.loaded(name).map_err(|err| match err {
                        Missing::Absent => {
                            Error::Schema(format!("cannot convert missing column `{name}`"))
                        }
                        Missing::Pruned => not_loaded(name),
                    })?;
                    schema.fields[pos].data_type = conversion.column_type();
                    targets.push((pos, name.as_str(), conversion));
                }
                Op::Convert(targets)
            }
        };
        Ok(Some(op))
    }
}

fn not_loaded(name: &str) -> Error {
    Error::Schema(format!("column `{name}` was not loaded"))
}

/// Source columns needed by the steps, worked out back to front.
fn projection(steps: &[Step]) -> Projection {
    steps
        .iter()
        .rev()
        .fold(Projection::All, |projection, step| match step {
            Step::SelectColumns { names } => Projection::Only(names.iter().cloned().collect()),
            Step::DropColumns { names } => projection.release(names.iter().map(String::as_str)),
            Step::Filter { predicate } => projection.require(predicate.columns()),
            Step::ConvertColumnTypes { mapping } => {
                projection.require(mapping.keys().map(String::as_str))
            }
            Step::ExtractPartitionColumns { format } => {
                projection.release(format.column_names().iter().map(String::as_str))
            }
            Step::ReadFiles { .. } | Step::RandomSample { .. } => projection,
        })
}

fn partition_columns(
    step: usize,
    kind: &'static str,
    format: &PartitionTemplate,
    files: &[FileRef],
    typing: PartitionTyping,
) -> Result<PartitionColumns> {
    let mut raw: Vec<Vec<String>> = Vec::with_capacity(files.len());
    for file in files {
        let Some(captures) = format.extract(&file.display_path()) else {
            let reason = format!("path does not match partition format `{format}`");
            return Err(at(step, kind, file, None, Error::Schema(reason)));
        };
        raw.push(captures.into_iter().map(|(_, value)| value).collect());
    }

    let fields: Vec<Field> = format
        .column_names()
        .iter()
        .enumerate()
        .map(|(col, name)| {
            let values = raw.iter().map(|captured| captured[col].as_str());
            Field::new(name.clone(), infer_partition_type(values, typing))
        })
        .collect();
    let values = raw
        .iter()
        .map(|captured| {
            captured
                .iter()
                .zip(&fields)
                .map(|(value, field)| partition_value(value, field.data_type))
                .collect()
        })
        .collect();
    Ok(PartitionColumns { fields, values })
}

/// Seed of the generator one sampling step uses for one file.
fn sample_seed(seed: u64, step: usize, file_index: usize) -> u64 {
    let mix = |state: u64, value: u64| StdRng::seed_from_u64(state).gen::<u64>() ^ value;
    StdRng::seed_from_u64(mix(mix(seed, step as u64), file_index as u64)).gen()
}

enum Missing {
    Absent,
    Pruned,
}

/// Columns visible at a point in the step list for one file.
///
/// `pruned` holds source columns the reader skipped; they still exist as far as schema
/// checks are concerned.
struct Schema {
    fields: Vec<Field>,
    pruned: HashSet<String>,
}

impl Schema {
    fn new(fields: &[Field], source_columns: &[String]) -> Self {
        let loaded: HashSet<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        let pruned = source_columns
            .iter()
            .filter(|name| !loaded.contains(name.as_str()))
            .cloned()
            .collect();
        Self {
            fields: fields.to_vec(),
            pruned,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    fn contains(&self, name: &str) -> bool {
        self.position(name).is_some() || self.pruned.contains(name)
    }

    fn loaded(&self, name: &str) -> std::result::Result<usize, Missing> {
        match self.position(name) {
            Some(pos) => Ok(pos),
            None if self.pruned.contains(name) => Err(Missing::Pruned),
            None => Err(Missing::Absent),
        }
    }

    fn index(&self) -> HashMap<String, usize> {
        self.fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.name.clone(), idx))
            .collect()
    }

    fn project(&mut self, keep: &[usize]) {
        self.fields = keep.iter().map(|&i| self.fields[i].clone()).collect();
    }
}

enum Op<'a> {
    Sample { probability: f64, rng: StdRng },
    Filter {
        predicate: &'a Expr,
        index: HashMap<String, usize>,
    },
    Project(Vec<usize>),
    Append(Vec<Value>),
    Convert(Vec<(usize, &'a str, &'a TypeConversion)>),
}

struct CompiledOp<'a> {
    step: usize,
    kind: &'static str,
    op: Op<'a>,
}

struct RowView<'r> {
    index: &'r HashMap<String, usize>,
    values: &'r [Value],
}

impl Row for RowView<'_> {
    fn get(&self, column: &str) -> Option<&Value> {
        self.index.get(column).map(|&idx| &self.values[idx])
    }
}

type StepFailure = (usize, &'static str, Error);

/// Run one row through the compiled steps. `Ok(None)` means a step removed the row.
fn apply(
    ops: &mut [CompiledOp<'_>],
    mut values: Vec<Value>,
) -> std::result::Result<Option<Vec<Value>>, StepFailure> {
    for compiled in ops.iter_mut() {
        let fail = |err: Error| (compiled.step, compiled.kind, err);
        match &mut compiled.op {
            Op::Sample { probability, rng } => {
                if !rng.gen_bool(*probability) {
                    return Ok(None);
                }
            }
            Op::Filter { predicate, index } => {
                let row = RowView {
                    index,
                    values: &values,
                };
                match evaluate_predicate(predicate, &row) {
                    Ok(true) => {}
                    Ok(false) => return Ok(None),
                    Err(err) => return Err(fail(err.into())),
                }
            }
            Op::Project(keep) => {
                values = keep.iter().map(|&i| values[i].clone()).collect();
            }
            Op::Append(extra) => values.extend(extra.iter().cloned()),
            Op::Convert(targets) => {
                for (pos, column, conversion) in targets.iter() {
                    let value = &values[*pos];
                    match conversion.convert(value) {
                        Some(converted) => values[*pos] = converted,
                        None => {
                            return Err(fail(Error::Conversion {
                                column: column.to_string(),
                                value: describe(value),
                                target: conversion.name(),
                            }))
                        }
                    }
                }
            }
        }
    }
    Ok(Some(values))
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", &**s),
        other => other.to_string(),
    }
}

struct FileOutput {
    fields: Vec<Field>,
    rows: Vec<Vec<Value>>,
}

/// Concatenate per-file outputs under the union of their schemas.
fn union(outputs: Vec<FileOutput>, files: &[FileRef]) -> Result<MaterializedTable> {
    let mut fields: Vec<Field> = Vec::new();
    let mut origin: Vec<usize> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (file_idx, output) in outputs.iter().enumerate() {
        for field in &output.fields {
            match index.get(&field.name) {
                Some(&pos) => {
                    let existing = fields[pos].data_type;
                    let Some(unified) = existing.unify(field.data_type) else {
                        return Err(Error::Schema(format!(
                            "column `{}` is {existing} in {} but {} in {}",
                            field.name,
                            files[origin[pos]].path.display(),
                            field.data_type,
                            files[file_idx].path.display(),
                        )));
                    };
                    fields[pos].data_type = unified;
                }
                None => {
                    index.insert(field.name.clone(), fields.len());
                    fields.push(field.clone());
                    origin.push(file_idx);
                }
            }
        }
    }

    let total = outputs.iter().map(|o| o.rows.len()).sum();
    let mut rows = Vec::with_capacity(total);
    for output in outputs {
        let positions: Vec<usize> = output.fields.iter().map(|f| index[&f.name]).collect();
        for row in output.rows {
            let mut full = vec![Value::Null; fields.len()];
            for (value, &pos) in row.into_iter().zip(&positions) {
                full[pos] = value.widen_to(fields[pos].data_type);
            }
            rows.push(full);
        }
    }
    Ok(MaterializedTable::new(fields, rows))
}
