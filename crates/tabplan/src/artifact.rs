//! The `MLTable` artifact: a YAML description of a table plan.
//!
//! ```yaml
//! paths:
//! - pattern: data/puYear=2015/puMonth=*/*.parquet
//! transformations:
//! - read_parquet:
//!     include_path_column: false
//! - take_random_sample:
//!     probability: 0.001
//!     seed: 735
//! - filter: tripDistance > 0
//! ```
//!
//! Serialization is a pure function of the step list. Unknown top-level keys are ignored so
//! newer writers can add sections; unknown keys inside a step are rejected.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::{Mapping, Value as Yaml};
use tabplan_fs::WriteMode;
use tabplan_source::{DelimitedOptions, FileFormat, PathPattern};

use crate::error::{Error, Result};
use crate::step::{Step, TypeConversion};
use crate::table::Table;

/// File name of the artifact inside its directory.
pub const ARTIFACT_FILE_NAME: &str = "MLTable";

const PATHS: &str = "paths";
const TRANSFORMATIONS: &str = "transformations";

#[derive(Clone, Copy, Debug, Default)]
pub struct SaveOptions {
    /// Replace an existing artifact instead of failing with `DestinationExists`.
    pub overwrite: bool,
}

/// Maps an artifact reference to the artifact file it names.
///
/// Storage services that hand out their own reference strings implement this so
/// [`Table::load_with`] can reach the downloaded directory.
pub trait ArtifactResolver {
    fn resolve(&self, reference: &str) -> Result<PathBuf>;
}

/// Resolves local directories, artifact file paths and `file://` URIs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalResolver;

impl ArtifactResolver for LocalResolver {
    fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let trimmed = reference.trim();
        let local = trimmed.strip_prefix("file://").unwrap_or(trimmed);
        if local.is_empty() || local.contains("://") {
            return Err(Error::ArtifactNotFound {
                reference: reference.to_string(),
            });
        }
        let path = Path::new(local);
        if path.is_dir() {
            return Ok(path.join(ARTIFACT_FILE_NAME));
        }
        Ok(path.to_path_buf())
    }
}

/// Render `steps` as artifact text.
pub fn serialize(steps: &[Step]) -> Result<String> {
    let Some(Step::ReadFiles {
        paths,
        format,
        include_path_column,
    }) = steps.first()
    else {
        return Err(Error::invalid_artifact(
            TRANSFORMATIONS,
            "a plan must start with a read step",
        ));
    };

    let paths: Vec<Yaml> = paths
        .iter()
        .map(|path| single(path.kind(), Yaml::from(path.as_str())))
        .collect();

    let mut transformations = Vec::with_capacity(steps.len());
    transformations.push(single(
        steps[0].kind(),
        read_params(format, *include_path_column),
    ));
    for step in &steps[1..] {
        transformations.push(single(step.kind(), step_params(step)?));
    }

    let mut root = Mapping::new();
    root.insert(Yaml::from(PATHS), Yaml::Sequence(paths));
    root.insert(Yaml::from(TRANSFORMATIONS), Yaml::Sequence(transformations));
    serde_yaml::to_string(&Yaml::Mapping(root)).map_err(|err| Error::invalid_artifact(TRANSFORMATIONS, err))
}

fn single(key: &str, value: Yaml) -> Yaml {
    let mut map = Mapping::new();
    map.insert(Yaml::from(key), value);
    Yaml::Mapping(map)
}

fn read_params(format: &FileFormat, include_path_column: bool) -> Yaml {
    let mut map = Mapping::new();
    if let FileFormat::Delimited(options) = format {
        let delimiter = char::from(options.delimiter).to_string();
        map.insert(Yaml::from("delimiter"), Yaml::from(delimiter));
        map.insert(Yaml::from("header"), Yaml::from(options.header));
        map.insert(
            Yaml::from("infer_column_types"),
            Yaml::from(options.infer_column_types),
        );
    }
    map.insert(
        Yaml::from("include_path_column"),
        Yaml::from(include_path_column),
    );
    Yaml::Mapping(map)
}

fn step_params(step: &Step) -> Result<Yaml> {
    let value = match step {
        Step::ReadFiles { .. } => {
            return Err(Error::invalid_artifact(
                step.kind(),
                "a plan can only have one read step",
            ))
        }
        Step::RandomSample { probability, seed } => {
            let mut map = Mapping::new();
            map.insert(Yaml::from("probability"), Yaml::from(*probability));
            if let Some(seed) = seed {
                map.insert(Yaml::from("seed"), Yaml::from(*seed));
            }
            Yaml::Mapping(map)
        }
        Step::Filter { predicate } => Yaml::from(predicate.to_string()),
        Step::DropColumns { names } => names.iter().map(|n| Yaml::from(n.as_str())).collect(),
        Step::SelectColumns { names } => names.iter().map(|n| Yaml::from(n.as_str())).collect(),
        Step::ExtractPartitionColumns { format } => {
            single("partition_format", Yaml::from(format.as_str()))
        }
        Step::ConvertColumnTypes { mapping } => {
            let mut map = Mapping::new();
            for (column, conversion) in mapping {
                let value = match conversion {
                    TypeConversion::DateTime { formats } => single(
                        "datetime",
                        single(
                            "formats",
                            formats.iter().map(|f| Yaml::from(f.as_str())).collect(),
                        ),
                    ),
                    other => Yaml::from(other.name()),
                };
                map.insert(Yaml::from(column.as_str()), value);
            }
            Yaml::Mapping(map)
        }
    };
    Ok(value)
}

/// Parse artifact text back into a step list.
pub fn deserialize(text: &str) -> Result<Vec<Step>> {
    let root: Yaml =
        serde_yaml::from_str(text).map_err(|err| Error::invalid_artifact("(document)", err))?;
    let Yaml::Mapping(root) = root else {
        return Err(Error::invalid_artifact(
            "(document)",
            "expected a mapping at the top level",
        ));
    };
    for key in root.keys() {
        match key.as_str() {
            Some(PATHS) | Some(TRANSFORMATIONS) => {}
            _ => log::debug!("ignoring unknown artifact key {key:?}"),
        }
    }

    let paths = match root.get(PATHS) {
        Some(Yaml::Sequence(records)) => records
            .iter()
            .map(path_record)
            .collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(Error::invalid_artifact(PATHS, "expected a list")),
        None => return Err(Error::invalid_artifact(PATHS, "missing")),
    };
    let records = match root.get(TRANSFORMATIONS) {
        Some(Yaml::Sequence(records)) => records,
        Some(_) => return Err(Error::invalid_artifact(TRANSFORMATIONS, "expected a list")),
        None => return Err(Error::invalid_artifact(TRANSFORMATIONS, "missing")),
    };

    let mut steps = Vec::with_capacity(records.len());
    for (idx, record) in records.iter().enumerate() {
        let (kind, params) = single_key(TRANSFORMATIONS, record)?;
        let step = if let Some((format, include_path_column)) = read_format(kind, params)? {
            if idx != 0 {
                return Err(Error::invalid_artifact(kind, "the read step must come first"));
            }
            Step::read_files(paths.clone(), format, include_path_column)
                .map_err(|err| err.in_artifact(PATHS))?
        } else {
            if idx == 0 {
                return Err(Error::invalid_artifact(
                    kind,
                    "the first transformation must be a read step",
                ));
            }
            decode_step(kind, params)?
        };
        steps.push(step);
    }
    if steps.is_empty() {
        return Err(Error::invalid_artifact(TRANSFORMATIONS, "no read step"));
    }
    Ok(steps)
}

/// Build a path pattern from a `{file|folder|pattern: path}` record.
pub fn path_pattern(kind: &str, path: &str) -> Result<PathPattern> {
    let pattern = match kind {
        "file" => PathPattern::file(path),
        "folder" => PathPattern::folder(path),
        "pattern" => PathPattern::pattern(path),
        other => {
            return Err(Error::invalid_artifact(
                PATHS,
                format!("unknown path kind `{other}` (expected file, folder or pattern)"),
            ))
        }
    };
    Ok(pattern)
}

fn path_record(record: &Yaml) -> Result<PathPattern> {
    let (kind, path) = single_key(PATHS, record)?;
    let Some(path) = path.as_str() else {
        return Err(Error::invalid_artifact(PATHS, format!("`{kind}` must be a string")));
    };
    path_pattern(kind, path)
}

fn single_key<'a>(section: &str, record: &'a Yaml) -> Result<(&'a str, &'a Yaml)> {
    let Yaml::Mapping(map) = record else {
        return Err(Error::invalid_artifact(section, "expected a single-key mapping"));
    };
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => match key.as_str() {
            Some(key) => Ok((key, value)),
            None => Err(Error::invalid_artifact(section, "record keys must be strings")),
        },
        _ => Err(Error::invalid_artifact(
            section,
            "each record must have exactly one key",
        )),
    }
}

fn params<T: for<'de> Deserialize<'de>>(kind: &str, value: &Yaml) -> Result<T> {
    // A bare key (`- read_parquet:`) carries null parameters.
    let value = match value {
        Yaml::Null => Yaml::Mapping(Mapping::new()),
        other => other.clone(),
    };
    serde_yaml::from_value(value).map_err(|err| Error::invalid_artifact(kind, err))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadParams {
    #[serde(default)]
    include_path_column: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DelimitedParams {
    #[serde(default = "default_delimiter")]
    delimiter: String,
    #[serde(default = "default_true")]
    header: bool,
    #[serde(default = "default_true")]
    infer_column_types: bool,
    #[serde(default)]
    include_path_column: bool,
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SampleParams {
    probability: f64,
    #[serde(default)]
    seed: Option<u64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PartitionParams {
    partition_format: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DateTimeParams {
    #[serde(default)]
    formats: Vec<String>,
}

fn read_format(kind: &str, value: &Yaml) -> Result<Option<(FileFormat, bool)>> {
    let format = match kind {
        "read_parquet" => {
            let p: ReadParams = params(kind, value)?;
            (FileFormat::Parquet, p.include_path_column)
        }
        "read_json_lines" => {
            let p: ReadParams = params(kind, value)?;
            (FileFormat::JsonLines, p.include_path_column)
        }
        "read_delimited" => {
            let p: DelimitedParams = params(kind, value)?;
            let delimiter = match p.delimiter.as_bytes() {
                [byte] => *byte,
                _ => {
                    return Err(Error::invalid_artifact(
                        kind,
                        format!("delimiter must be a single ASCII character, got {:?}", p.delimiter),
                    ))
                }
            };
            let options = DelimitedOptions {
                delimiter,
                header: p.header,
                infer_column_types: p.infer_column_types,
            };
            (FileFormat::Delimited(options), p.include_path_column)
        }
        _ => return Ok(None),
    };
    Ok(Some(format))
}

fn decode_step(kind: &str, value: &Yaml) -> Result<Step> {
    let invalid = |err: Error| err.in_artifact(kind);
    match kind {
        "take_random_sample" => {
            let p: SampleParams = params(kind, value)?;
            Step::random_sample(p.probability, p.seed).map_err(invalid)
        }
        "filter" => match value.as_str() {
            Some(text) => Step::filter(text).map_err(invalid),
            None => Err(Error::invalid_artifact(kind, "expected the predicate as a string")),
        },
        "drop_columns" => Step::drop_columns(names(kind, value)?).map_err(invalid),
        "select_columns" | "keep_columns" => {
            Step::select_columns(names(kind, value)?).map_err(invalid)
        }
        "extract_columns_from_partition_format" => {
            let p: PartitionParams = params(kind, value)?;
            Step::extract_partition_columns(&p.partition_format).map_err(invalid)
        }
        "convert_column_types" => {
            let Yaml::Mapping(map) = value else {
                return Err(Error::invalid_artifact(kind, "expected a mapping of column to type"));
            };
            let mut mapping = Vec::with_capacity(map.len());
            for (column, target) in map {
                let Some(column) = column.as_str() else {
                    return Err(Error::invalid_artifact(kind, "column names must be strings"));
                };
                mapping.push((column.to_string(), conversion(kind, column, target)?));
            }
            Step::convert_column_types(mapping).map_err(invalid)
        }
        other => Err(Error::invalid_artifact(other, "unknown transformation")),
    }
}

fn names(kind: &str, value: &Yaml) -> Result<Vec<String>> {
    // A single column may be written as a scalar.
    match value {
        Yaml::String(name) => Ok(vec![name.clone()]),
        other => params(kind, other),
    }
}

fn conversion(kind: &str, column: &str, target: &Yaml) -> Result<TypeConversion> {
    let key = format!("{kind}.{column}");
    if let Some(name) = target.as_str() {
        return match name {
            "int" => Ok(TypeConversion::Int),
            "float" => Ok(TypeConversion::Float),
            "boolean" => Ok(TypeConversion::Boolean),
            "string" => Ok(TypeConversion::String),
            "datetime" => Ok(TypeConversion::DateTime {
                formats: Vec::new(),
            }),
            other => Err(Error::invalid_artifact(key, format!("unknown type `{other}`"))),
        };
    }
    match single_key(&key, target)? {
        ("datetime", params_value) => {
            let p: DateTimeParams = params(&key, params_value)?;
            Ok(TypeConversion::DateTime { formats: p.formats })
        }
        (other, _) => Err(Error::invalid_artifact(key, format!("unknown type `{other}`"))),
    }
}

/// Read and parse the artifact `resolver` finds for `reference`.
pub(crate) fn load(reference: &str, resolver: &dyn ArtifactResolver) -> Result<Table> {
    let file = resolver.resolve(reference)?;
    let text = match fs::read_to_string(&file) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::ArtifactNotFound {
                reference: reference.to_string(),
            })
        }
        Err(source) => return Err(Error::Io { path: file, source }),
    };
    let base = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    log::debug!("loaded artifact {}", file.display());
    Table::from_artifact_str(&text, Some(base))
}

/// Write `table`'s artifact into `dir`, returning the artifact file path.
pub(crate) fn save(table: &Table, dir: &Path, options: &SaveOptions) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|source| Error::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    let steps = rebase(table, dir)?;
    let text = serialize(&steps)?;
    let dest = dir.join(ARTIFACT_FILE_NAME);
    let mode = if options.overwrite {
        WriteMode::Replace
    } else {
        WriteMode::CreateNew
    };
    match tabplan_fs::atomic_write_bytes(&dest, mode, text.as_bytes()) {
        Ok(()) => {
            log::info!("saved table plan to {}", dest.display());
            Ok(dest)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Err(Error::DestinationExists { path: dest })
        }
        Err(source) => Err(Error::Write { path: dest, source }),
    }
}

/// Rewrite relative patterns to absolute ones when `dir` is not the table's base, so the saved
/// artifact still resolves to the same files.
fn rebase(table: &Table, dir: &Path) -> Result<Vec<Step>> {
    let mut steps = table.steps().to_vec();
    let base = table.base_dir()?;
    if same_dir(&base, dir) {
        return Ok(steps);
    }
    if let Some(Step::ReadFiles { paths, .. }) = steps.first_mut() {
        for pattern in paths.iter_mut() {
            let local = pattern.local_path()?;
            if local.is_relative() {
                let absolute = base.join(local);
                log::debug!("rebasing {pattern} onto {}", base.display());
                *pattern = pattern.with_path(absolute.to_string_lossy().into_owned());
            }
        }
    }
    Ok(steps)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn serialized_form_is_stable() {
        let table = Table::from_parquet_files([PathPattern::pattern(
            "data/puYear=2015/puMonth=*/*.parquet",
        )])
        .and_then(|t| t.take_random_sample(0.001, Some(735)))
        .and_then(|t| t.filter("tripDistance>0 AND (fare >= 2.50)"))
        .and_then(|t| t.drop_columns(["storeAndFwdFlag", "lpepPickupDatetime"]))
        .and_then(|t| t.extract_columns_from_partition_format("/puYear={year}/puMonth={month}"))
        .and_then(|t| {
            t.convert_column_types([
                ("fare", TypeConversion::Float),
                ("pickup", TypeConversion::datetime(["%Y-%m-%d %H:%M:%S"])),
            ])
        })
        .expect("build table");

        let expected = "\
paths:
- pattern: data/puYear=2015/puMonth=*/*.parquet
transformations:
- read_parquet:
    include_path_column: false
- take_random_sample:
    probability: 0.001
    seed: 735
- filter: tripDistance > 0 and fare >= 2.5
- drop_columns:
  - lpepPickupDatetime
  - storeAndFwdFlag
- extract_columns_from_partition_format:
    partition_format: /puYear={year}/puMonth={month}
- convert_column_types:
    fare: float
    pickup:
      datetime:
        formats:
        - '%Y-%m-%d %H:%M:%S'
";
        assert_eq!(table.to_artifact_string().expect("serialize"), expected);
        assert_eq!(deserialize(expected).expect("deserialize"), table.steps());
    }

    #[test]
    fn delimited_options_round_trip() {
        let options = DelimitedOptions {
            delimiter: b'|',
            header: false,
            infer_column_types: false,
        };
        let table = Table::from_delimited_files([PathPattern::folder("raw")], options)
            .expect("table")
            .with_path_column();
        let text = table.to_artifact_string().expect("serialize");
        assert!(text.contains("delimiter: '|'"), "{text}");
        assert_eq!(deserialize(&text).expect("deserialize"), table.steps());
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let text = "\
type: mltable
paths:
- file: a.csv
transformations:
- read_delimited:
metadata:
  owner: someone
";
        let steps = deserialize(text).expect("deserialize");
        assert_eq!(steps.len(), 1);
        assert_eq!(
            steps[0],
            Step::ReadFiles {
                paths: vec![PathPattern::file("a.csv")],
                format: FileFormat::Delimited(DelimitedOptions::default()),
                include_path_column: false,
            }
        );
    }

    fn invalid_key(text: &str) -> String {
        match deserialize(text) {
            Err(Error::InvalidArtifact { key, .. }) => key,
            other => panic!("expected InvalidArtifact, got {other:?}"),
        }
    }

    #[test]
    fn malformed_records_name_the_offending_key() {
        let head = "paths:\n- pattern: '*.parquet'\ntransformations:\n- read_parquet: {}\n";
        assert_eq!(invalid_key(&format!("{head}- shuffle_rows: {{}}\n")), "shuffle_rows");
        assert_eq!(
            invalid_key(&format!("{head}- take_random_sample:\n    probability: 0.5\n    sede: 1\n")),
            "take_random_sample"
        );
        assert_eq!(
            invalid_key(&format!("{head}- take_random_sample:\n    probability: 0\n")),
            "take_random_sample"
        );
        assert_eq!(invalid_key(&format!("{head}- filter: 'a >'\n")), "filter");
        assert_eq!(
            invalid_key(&format!("{head}- convert_column_types:\n    fare: decimal\n")),
            "convert_column_types.fare"
        );
        assert_eq!(
            invalid_key("paths:\n- pattern: x\ntransformations:\n- filter: a > 1\n"),
            "filter"
        );
        assert_eq!(invalid_key("transformations:\n- read_parquet: {}\n"), "paths");
        assert_eq!(
            invalid_key("paths:\n- url: x\ntransformations:\n- read_parquet: {}\n"),
            "paths"
        );
    }
}
