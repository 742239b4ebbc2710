use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde_json::Map;
use tabplan_expr::{ColumnType, Value};

use super::{streamed_chunks, FileReader, Rows};
use crate::error::{Result, SourceError};
use crate::schema::{Field, Projection};

type Object = Map<String, serde_json::Value>;

/// Read newline-delimited JSON objects. Columns are the union of keys in first-seen order;
/// a column whose values disagree on type is read as strings.
pub(super) fn read(
    path: &Path,
    file: File,
    projection: &Projection,
    batch_size: usize,
) -> Result<FileReader> {
    let mut objects = objects(path.to_path_buf(), file);

    let mut source_columns: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut window: Vec<Vec<(usize, Value)>> = Vec::new();
    for object in objects.by_ref().take(batch_size) {
        let (_, object) = object?;
        let mut record = Vec::with_capacity(object.len());
        for (key, value) in object {
            let idx = match index.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = source_columns.len();
                    source_columns.push(key.clone());
                    index.insert(key, idx);
                    idx
                }
            };
            if projection.includes(&source_columns[idx]) {
                record.push((idx, json_value(value)));
            }
        }
        window.push(record);
    }
    let lookahead = objects.next();
    let whole_file = lookahead.is_none();

    let mut types = vec![ColumnType::Null; source_columns.len()];
    let mut conflicted = vec![false; source_columns.len()];
    for (idx, value) in window.iter().flatten() {
        match types[*idx].unify(value.column_type()) {
            Some(unified) => types[*idx] = unified,
            None => conflicted[*idx] = true,
        }
    }

    let mut slot = vec![None; source_columns.len()];
    let mut fields = Vec::new();
    for (idx, name) in source_columns.iter().enumerate() {
        if !projection.includes(name) {
            continue;
        }
        // Values the window never saw may still follow it.
        if conflicted[idx] || (types[idx] == ColumnType::Null && !whole_file) {
            types[idx] = ColumnType::String;
        }
        slot[idx] = Some(fields.len());
        fields.push(Field::new(name.clone(), types[idx]));
    }

    let decoder = ObjectDecoder {
        path: path.to_path_buf(),
        index,
        names: source_columns.clone(),
        types,
        slot,
        width: fields.len(),
        window: window.len(),
    };
    // The window's values were typed by the same rules, so only later lines can fail.
    let first = window
        .into_iter()
        .map(|record| decoder.row(0, record))
        .collect::<Result<Rows>>()?;

    let rest = lookahead.into_iter().chain(objects).map(move |object| {
        let (line_no, object) = object?;
        decoder.decode(line_no, object)
    });
    Ok(FileReader::new(
        source_columns,
        fields,
        streamed_chunks(first, rest, batch_size),
    ))
}

/// The file's non-blank lines as objects, with their one-based line numbers.
fn objects(path: PathBuf, file: File) -> impl Iterator<Item = Result<(usize, Object)>> + Send {
    BufReader::new(file)
        .lines()
        .enumerate()
        .filter_map(move |(idx, line)| {
            let line_no = idx + 1;
            let line = match line {
                Ok(line) => line,
                Err(err) => return Some(Err(SourceError::io(&path, err))),
            };
            if line.trim().is_empty() {
                return None;
            }
            Some(match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(serde_json::Value::Object(object)) => Ok((line_no, object)),
                Ok(_) => Err(SourceError::decode(
                    &path,
                    format!("line {line_no}: expected a JSON object"),
                )),
                Err(err) => Err(SourceError::decode(&path, format!("line {line_no}: {err}"))),
            })
        })
}

struct ObjectDecoder {
    path: PathBuf,
    index: HashMap<String, usize>,
    names: Vec<String>,
    types: Vec<ColumnType>,
    /// Output position of each source column, `None` when it is not projected.
    slot: Vec<Option<usize>>,
    width: usize,
    window: usize,
}

impl ObjectDecoder {
    fn decode(&self, line_no: usize, object: Object) -> Result<Vec<Value>> {
        let mut record = Vec::with_capacity(object.len());
        for (key, value) in object {
            let Some(&idx) = self.index.get(&key) else {
                return Err(SourceError::decode(
                    &self.path,
                    format!(
                        "line {line_no}: key `{key}` does not appear in the first {} records",
                        self.window
                    ),
                ));
            };
            if self.slot[idx].is_some() {
                record.push((idx, json_value(value)));
            }
        }
        self.row(line_no, record)
    }

    fn row(&self, line_no: usize, record: Vec<(usize, Value)>) -> Result<Vec<Value>> {
        let mut row = vec![Value::Null; self.width];
        for (idx, value) in record {
            let Some(pos) = self.slot[idx] else { continue };
            let column_type = self.types[idx];
            let found = value.column_type();
            row[pos] = coerce(value, column_type).ok_or_else(|| {
                SourceError::decode(
                    &self.path,
                    format!(
                        "line {line_no}: {found} value in column `{}`, which the first {} records typed as {column_type}",
                        self.names[idx], self.window
                    ),
                )
            })?;
        }
        Ok(row)
    }
}

fn json_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::from(s),
        nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
            Value::from(nested.to_string())
        }
    }
}

/// `value` at `column_type`, or `None` if the column cannot hold it.
fn coerce(value: Value, column_type: ColumnType) -> Option<Value> {
    match (value, column_type) {
        (Value::Null, _) => Some(Value::Null),
        (value @ Value::String(_), ColumnType::String) => Some(value),
        (value, ColumnType::String) => Some(Value::from(value.to_string())),
        (value, column_type) => (column_type.unify(value.column_type()) == Some(column_type))
            .then(|| value.widen_to(column_type)),
    }
}
