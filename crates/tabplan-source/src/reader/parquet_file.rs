use std::fs::File;
use std::path::Path;

use arrow_array::cast::AsArray;
use arrow_array::temporal_conversions::{
    date32_to_datetime, date64_to_datetime, timestamp_ms_to_datetime, timestamp_ns_to_datetime,
    timestamp_s_to_datetime, timestamp_us_to_datetime,
};
use arrow_array::types::{
    Date32Type, Date64Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{Array, RecordBatch};
use arrow_schema::{DataType, TimeUnit};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use tabplan_expr::{ColumnType, Value};

use super::{FileReader, Rows};
use crate::error::{Result, SourceError};
use crate::schema::{Field, Projection};

pub(super) fn read(
    path: &Path,
    file: File,
    projection: &Projection,
    batch_size: usize,
) -> Result<FileReader> {
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).map_err(|err| SourceError::decode(path, err))?;

    let arrow_schema = builder.schema().clone();
    let source_columns: Vec<String> = arrow_schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();

    let mut roots = Vec::new();
    let mut fields = Vec::new();
    for (idx, field) in arrow_schema.fields().iter().enumerate() {
        if !projection.includes(field.name()) {
            continue;
        }
        let Some(data_type) = column_type(field.data_type()) else {
            return Err(SourceError::decode(
                path,
                format!(
                    "column `{}` has unsupported type {}",
                    field.name(),
                    field.data_type()
                ),
            ));
        };
        roots.push(idx);
        fields.push(Field::new(field.name().clone(), data_type));
    }

    let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
    let reader = builder
        .with_projection(mask)
        .with_batch_size(batch_size)
        .build()
        .map_err(|err| SourceError::decode(path, err))?;

    let path = path.to_path_buf();
    let chunks = reader.map(move |batch| {
        let batch = batch.map_err(|err| SourceError::decode(&path, err))?;
        batch_to_rows(&path, &batch)
    });
    Ok(FileReader::new(source_columns, fields, Box::new(chunks)))
}

fn column_type(data_type: &DataType) -> Option<ColumnType> {
    match data_type {
        DataType::Null => Some(ColumnType::Null),
        DataType::Boolean => Some(ColumnType::Boolean),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => Some(ColumnType::Int),
        DataType::Float32 | DataType::Float64 => Some(ColumnType::Float),
        DataType::Utf8 | DataType::LargeUtf8 => Some(ColumnType::String),
        DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => {
            Some(ColumnType::DateTime)
        }
        _ => None,
    }
}

fn batch_to_rows(path: &Path, batch: &RecordBatch) -> Result<Rows> {
    let mut rows: Rows = (0..batch.num_rows())
        .map(|_| Vec::with_capacity(batch.num_columns()))
        .collect();
    for (column, field) in batch.columns().iter().zip(batch.schema().fields()) {
        for (idx, row) in rows.iter_mut().enumerate() {
            row.push(cell(path, field.name(), column.as_ref(), idx)?);
        }
    }
    Ok(rows)
}

fn cell(path: &Path, name: &str, array: &dyn Array, idx: usize) -> Result<Value> {
    if array.is_null(idx) {
        return Ok(Value::Null);
    }
    let value = match array.data_type() {
        DataType::Null => Value::Null,
        DataType::Boolean => Value::Boolean(array.as_boolean().value(idx)),
        DataType::Int8 => Value::Int(array.as_primitive::<Int8Type>().value(idx).into()),
        DataType::Int16 => Value::Int(array.as_primitive::<Int16Type>().value(idx).into()),
        DataType::Int32 => Value::Int(array.as_primitive::<Int32Type>().value(idx).into()),
        DataType::Int64 => Value::Int(array.as_primitive::<Int64Type>().value(idx)),
        DataType::UInt8 => Value::Int(array.as_primitive::<UInt8Type>().value(idx).into()),
        DataType::UInt16 => Value::Int(array.as_primitive::<UInt16Type>().value(idx).into()),
        DataType::UInt32 => Value::Int(array.as_primitive::<UInt32Type>().value(idx).into()),
        DataType::UInt64 => {
            let raw = array.as_primitive::<UInt64Type>().value(idx);
            let value = i64::try_from(raw).map_err(|_| {
                SourceError::decode(path, format!("column `{name}`: {raw} does not fit in i64"))
            })?;
            Value::Int(value)
        }
        DataType::Float32 => Value::Float(array.as_primitive::<Float32Type>().value(idx).into()),
        DataType::Float64 => Value::Float(array.as_primitive::<Float64Type>().value(idx)),
        DataType::Utf8 => Value::from(array.as_string::<i32>().value(idx)),
        DataType::LargeUtf8 => Value::from(array.as_string::<i64>().value(idx)),
        DataType::Timestamp(unit, _) => {
            let datetime = match unit {
                TimeUnit::Second => {
                    timestamp_s_to_datetime(array.as_primitive::<TimestampSecondType>().value(idx))
                }
                TimeUnit::Millisecond => timestamp_ms_to_datetime(
                    array.as_primitive::<TimestampMillisecondType>().value(idx),
                ),
                TimeUnit::Microsecond => timestamp_us_to_datetime(
                    array.as_primitive::<TimestampMicrosecondType>().value(idx),
                ),
                TimeUnit::Nanosecond => timestamp_ns_to_datetime(
                    array.as_primitive::<TimestampNanosecondType>().value(idx),
                ),
            };
            datetime_or_error(path, name, datetime)?
        }
        DataType::Date32 => datetime_or_error(
            path,
            name,
            date32_to_datetime(array.as_primitive::<Date32Type>().value(idx)),
        )?,
        DataType::Date64 => datetime_or_error(
            path,
            name,
            date64_to_datetime(array.as_primitive::<Date64Type>().value(idx)),
        )?,
        other => {
            return Err(SourceError::decode(
                path,
                format!("column `{name}` has unsupported type {other}"),
            ))
        }
    };
    Ok(value)
}

fn datetime_or_error(
    path: &Path,
    name: &str,
    datetime: Option<chrono::NaiveDateTime>,
) -> Result<Value> {
    datetime
        .map(Value::DateTime)
        .ok_or_else(|| SourceError::decode(path, format!("column `{name}`: datetime out of range")))
}
