use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tabplan_expr::{ColumnType, Value};

use super::{streamed_chunks, DelimitedOptions, FileReader, Rows};
use crate::error::{Result, SourceError};
use crate::schema::{Field, Projection};

pub(super) fn read(
    path: &Path,
    file: File,
    options: &DelimitedOptions,
    projection: &Projection,
    batch_size: usize,
) -> Result<FileReader> {
    let mut records = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        // Headers are handled here so unnamed and duplicate columns can be reported.
        .has_headers(false)
        .flexible(true)
        .from_reader(BufReader::new(file))
        .into_records();

    let header = if options.header {
        records
            .next()
            .transpose()
            .map_err(|err| map_csv_error(path, err))?
            .map(|record| record.iter().map(str::to_string).collect())
    } else {
        None
    };

    let mut window = Vec::new();
    for record in records.by_ref().take(batch_size) {
        window.push(record.map_err(|err| map_csv_error(path, err))?);
    }
    let lookahead = records.next();
    let whole_file = lookahead.is_none();

    let width = window
        .iter()
        .map(StringRecord::len)
        .chain(header.as_ref().map(Vec::len))
        .max()
        .unwrap_or(0);
    let source_columns = column_names(path, header, width)?;

    let mut columns = Vec::new();
    for (idx, name) in source_columns.iter().enumerate() {
        if !projection.includes(name) {
            continue;
        }
        let raw: Vec<&str> = window
            .iter()
            .map(|record| record.get(idx).unwrap_or(""))
            .collect();
        let mut data_type = if options.infer_column_types {
            infer_column_type(&raw)
        } else if raw.iter().all(|v| v.is_empty()) {
            ColumnType::Null
        } else {
            ColumnType::String
        };
        // Values may still follow the window.
        if data_type == ColumnType::Null && !whole_file {
            data_type = ColumnType::String;
        }
        columns.push((idx, Field::new(name.clone(), data_type)));
    }

    let decoder = RecordDecoder {
        path: path.to_path_buf(),
        columns,
        width,
        window: window.len(),
    };
    let first = window
        .iter()
        .map(|record| decoder.decode(record))
        .collect::<Result<Rows>>()?;
    let fields = decoder.columns.iter().map(|(_, field)| field.clone()).collect();

    let rest = lookahead.into_iter().chain(records).map(move |record| {
        let record = record.map_err(|err| map_csv_error(&decoder.path, err))?;
        decoder.decode(&record)
    });
    Ok(FileReader::new(
        source_columns,
        fields,
        streamed_chunks(first, rest, batch_size),
    ))
}

/// Decodes records into rows of the projected columns, at the types the window inferred.
struct RecordDecoder {
    path: PathBuf,
    /// Source index and field of each projected column.
    columns: Vec<(usize, Field)>,
    width: usize,
    window: usize,
}

impl RecordDecoder {
    fn decode(&self, record: &StringRecord) -> Result<Vec<Value>> {
        let line = record.position().map_or(0, |p| p.line());
        if record.len() > self.width {
            return Err(SourceError::decode(
                &self.path,
                format!(
                    "line {line}: record has {} fields but the header and first {} records have {}",
                    record.len(),
                    self.window,
                    self.width
                ),
            ));
        }
        self.columns
            .iter()
            .map(|(idx, field)| {
                let raw = record.get(*idx).unwrap_or("");
                parse_typed_value(raw, field.data_type).ok_or_else(|| {
                    SourceError::decode(
                        &self.path,
                        format!(
                            "line {line}: `{raw}` in column `{}` is not {}; the type was inferred from the first {} records",
                            field.name, field.data_type, self.window
                        ),
                    )
                })
            })
            .collect()
    }
}

fn column_names(path: &Path, header: Option<Vec<String>>, width: usize) -> Result<Vec<String>> {
    let mut names = header.unwrap_or_default();
    for (idx, name) in names.iter_mut().enumerate() {
        if name.trim().is_empty() {
            *name = format!("Column{}", idx + 1);
        }
    }
    if names.len() < width {
        names.extend((names.len()..width).map(|i| format!("Column{}", i + 1)));
    }

    let mut seen = HashSet::new();
    for name in &names {
        if !seen.insert(name.as_str()) {
            return Err(SourceError::decode(
                path,
                format!("duplicate column name `{name}` in header"),
            ));
        }
    }
    Ok(names)
}

/// Narrowest type every non-empty value parses as: `Int`, then `Float`, then `Boolean`.
fn infer_column_type(values: &[&str]) -> ColumnType {
    let mut is_int = true;
    let mut is_float = true;
    let mut is_bool = true;
    let mut any = false;
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        any = true;
        is_int &= value.parse::<i64>().is_ok();
        is_float &= value.parse::<f64>().is_ok();
        is_bool &= parse_bool(value).is_some();
    }
    if !any {
        ColumnType::Null
    } else if is_int {
        ColumnType::Int
    } else if is_float {
        ColumnType::Float
    } else if is_bool {
        ColumnType::Boolean
    } else {
        ColumnType::String
    }
}

/// The cell as `data_type`, or `None` if it does not parse as one. Empty cells are `Null`.
fn parse_typed_value(raw: &str, data_type: ColumnType) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Value::Null);
    }
    match data_type {
        ColumnType::Int => trimmed.parse().ok().map(Value::Int),
        ColumnType::Float => trimmed.parse().ok().map(Value::Float),
        ColumnType::Boolean => parse_bool(trimmed).map(Value::Boolean),
        ColumnType::Null => None,
        _ => Some(Value::from(raw)),
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn map_csv_error(path: &Path, err: csv::Error) -> SourceError {
    let line = err.position().map(|p| p.line());
    let reason = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => SourceError::io(path, source),
        _ => match line {
            Some(line) => SourceError::decode(path, format!("line {line}: {reason}")),
            None => SourceError::decode(path, reason),
        },
    }
}
