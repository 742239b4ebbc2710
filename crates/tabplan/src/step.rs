use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use tabplan_expr::{ColumnType, Expr, Value};
use tabplan_source::{FileFormat, PartitionTemplate, PathPattern};

use crate::error::{Error, Result};

/// Name of the column carrying each row's originating file path.
pub const PATH_COLUMN: &str = "Path";

/// Formats tried, in order, by a datetime conversion that declares none.
pub const DEFAULT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A declarative operation in a table plan.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    ReadFiles {
        paths: Vec<PathPattern>,
        format: FileFormat,
        include_path_column: bool,
    },
    RandomSample {
        probability: f64,
        seed: Option<u64>,
    },
    Filter {
        predicate: Expr,
    },
    DropColumns {
        names: BTreeSet<String>,
    },
    SelectColumns {
        names: Vec<String>,
    },
    ExtractPartitionColumns {
        format: PartitionTemplate,
    },
    ConvertColumnTypes {
        mapping: BTreeMap<String, TypeConversion>,
    },
}

impl Step {
    /// The step's record key in the artifact.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::ReadFiles { format, .. } => match format {
                FileFormat::Parquet => "read_parquet",
                FileFormat::Delimited(_) => "read_delimited",
                FileFormat::JsonLines => "read_json_lines",
            },
            Step::RandomSample { .. } => "take_random_sample",
            Step::Filter { .. } => "filter",
            Step::DropColumns { .. } => "drop_columns",
            Step::SelectColumns { .. } => "select_columns",
            Step::ExtractPartitionColumns { .. } => "extract_columns_from_partition_format",
            Step::ConvertColumnTypes { .. } => "convert_column_types",
        }
    }

    pub(crate) fn read_files(
        paths: Vec<PathPattern>,
        format: FileFormat,
        include_path_column: bool,
    ) -> Result<Step> {
        if paths.is_empty() {
            return Err(invalid("from_paths", "at least one path is required"));
        }
        for path in &paths {
            path.validate()?;
        }
        Ok(Step::ReadFiles {
            paths,
            format,
            include_path_column,
        })
    }

    pub(crate) fn random_sample(probability: f64, seed: Option<u64>) -> Result<Step> {
        if !probability.is_finite() || probability <= 0.0 || probability > 1.0 {
            return Err(invalid(
                "take_random_sample",
                format!("probability must be in (0, 1], got {probability}"),
            ));
        }
        Ok(Step::RandomSample { probability, seed })
    }

    pub(crate) fn filter(predicate: &str) -> Result<Step> {
        let predicate = tabplan_expr::parse(predicate)?;
        Ok(Step::Filter { predicate })
    }

    pub(crate) fn drop_columns(names: Vec<String>) -> Result<Step> {
        check_names("drop_columns", &names)?;
        Ok(Step::DropColumns {
            names: names.into_iter().collect(),
        })
    }

    pub(crate) fn select_columns(names: Vec<String>) -> Result<Step> {
        check_names("select_columns", &names)?;
        Ok(Step::SelectColumns { names })
    }

    pub(crate) fn extract_partition_columns(format: &str) -> Result<Step> {
        let format = PartitionTemplate::parse(format)?;
        Ok(Step::ExtractPartitionColumns { format })
    }

    pub(crate) fn convert_column_types(mapping: Vec<(String, TypeConversion)>) -> Result<Step> {
        const OPERATION: &str = "convert_column_types";
        if mapping.is_empty() {
            return Err(invalid(OPERATION, "at least one column is required"));
        }
        let mut out = BTreeMap::new();
        for (name, conversion) in mapping {
            if name.is_empty() {
                return Err(invalid(OPERATION, "column names must not be empty"));
            }
            if out.insert(name.clone(), conversion).is_some() {
                return Err(invalid(
                    OPERATION,
                    format!("column `{name}` is listed more than once"),
                ));
            }
        }
        Ok(Step::ConvertColumnTypes { mapping: out })
    }
}

fn invalid(operation: &'static str, reason: impl Into<String>) -> Error {
    Error::InvalidArgument {
        operation,
        reason: reason.into(),
    }
}

fn check_names(operation: &'static str, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(invalid(operation, "at least one column is required"));
    }
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(invalid(operation, "column names must not be empty"));
        }
        if !seen.insert(name.as_str()) {
            return Err(invalid(
                operation,
                format!("column `{name}` is listed more than once"),
            ));
        }
    }
    Ok(())
}

/// Target of a column type conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeConversion {
    Int,
    Float,
    Boolean,
    String,
    /// Parse strings with the given `strftime` formats, tried in order.
    DateTime {
        formats: Vec<String>,
    },
}

impl TypeConversion {
    pub fn datetime<S: Into<String>>(formats: impl IntoIterator<Item = S>) -> Self {
        TypeConversion::DateTime {
            formats: formats.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.column_type().name()
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            TypeConversion::Int => ColumnType::Int,
            TypeConversion::Float => ColumnType::Float,
            TypeConversion::Boolean => ColumnType::Boolean,
            TypeConversion::String => ColumnType::String,
            TypeConversion::DateTime { .. } => ColumnType::DateTime,
        }
    }

    /// Convert a single value, or `None` if it has no representation in the target type.
    pub fn convert(&self, value: &Value) -> Option<Value> {
        if value.is_null() {
            return Some(Value::Null);
        }
        match self {
            TypeConversion::Int => match value {
                Value::Int(v) => Some(Value::Int(*v)),
                Value::Float(v) => float_to_int(*v).map(Value::Int),
                Value::Boolean(v) => Some(Value::Int(i64::from(*v))),
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .ok()
                        .or_else(|| s.parse::<f64>().ok().and_then(float_to_int))
                        .map(Value::Int)
                }
                _ => None,
            },
            TypeConversion::Float => match value {
                Value::Int(v) => Some(Value::Float(*v as f64)),
                Value::Float(v) => Some(Value::Float(*v)),
                Value::Boolean(v) => Some(Value::Float(if *v { 1.0 } else { 0.0 })),
                Value::String(s) => s.trim().parse::<f64>().ok().map(Value::Float),
                _ => None,
            },
            TypeConversion::Boolean => match value {
                Value::Boolean(v) => Some(Value::Boolean(*v)),
                Value::Int(0) => Some(Value::Boolean(false)),
                Value::Int(1) => Some(Value::Boolean(true)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Some(Value::Boolean(true)),
                    "false" | "0" => Some(Value::Boolean(false)),
                    _ => None,
                },
                _ => None,
            },
            TypeConversion::String => match value {
                Value::String(_) => Some(value.clone()),
                other => Some(Value::from(other.to_string())),
            },
            TypeConversion::DateTime { formats } => match value {
                Value::DateTime(v) => Some(Value::DateTime(*v)),
                Value::String(s) => parse_datetime(s.trim(), formats).map(Value::DateTime),
                _ => None,
            },
        }
    }
}

fn float_to_int(v: f64) -> Option<i64> {
    // The upper bound is exclusive: i64::MAX as f64 rounds up to 2^63.
    let in_range = v >= i64::MIN as f64 && v < i64::MAX as f64;
    (v.fract() == 0.0 && in_range).then_some(v as i64)
}

fn parse_datetime(text: &str, formats: &[String]) -> Option<NaiveDateTime> {
    let try_format = |format: &str| {
        NaiveDateTime::parse_from_str(text, format).ok().or_else(|| {
            NaiveDate::parse_from_str(text, format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
    };
    if formats.is_empty() {
        DEFAULT_DATETIME_FORMATS
            .iter()
            .copied()
            .chain(std::iter::once("%Y-%m-%d"))
            .find_map(try_format)
    } else {
        formats.iter().find_map(|format| try_format(format))
    }
}
