use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use arrow_array::{ArrayRef, Float64Array, Int32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use pretty_assertions::assert_eq;
use tabplan_expr::{ColumnType, Value};
use tabplan_source::{
    open_reader, DelimitedOptions, Field, FileFormat, FileRef, LocalFileStore, Projection,
    ReadOptions, Rows, SourceError,
};

fn file_ref(path: &Path) -> FileRef {
    FileRef {
        path: path.to_path_buf(),
        pattern_index: 0,
    }
}

fn read_all(
    path: &Path,
    format: FileFormat,
    projection: &Projection,
    batch_size: usize,
) -> (Vec<String>, Vec<Field>, Vec<Rows>) {
    let options = ReadOptions {
        batch_size,
        ..ReadOptions::default()
    };
    let reader = open_reader(&LocalFileStore, &file_ref(path), &format, projection, &options)
        .expect("open reader");
    let source_columns = reader.source_columns().to_vec();
    let fields = reader.fields().to_vec();
    let chunks = reader.collect::<Result<Vec<_>, _>>().expect("decode");
    (source_columns, fields, chunks)
}

fn write_parquet(path: &Path) {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("vendorID", DataType::Utf8, false),
        ArrowField::new("passengerCount", DataType::Int32, true),
        ArrowField::new("tripDistance", DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec!["1", "2", "1"])),
        Arc::new(Int32Array::from(vec![Some(1), None, Some(3)])),
        Arc::new(Float64Array::from(vec![0.0, 2.5, 7.25])),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).expect("batch");
    let mut writer = ArrowWriter::try_new(File::create(path).expect("create"), schema, None)
        .expect("writer");
    writer.write(&batch).expect("write");
    writer.close().expect("close");
}

#[test]
fn parquet_reads_projected_columns_in_batches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("part-0.parquet");
    write_parquet(&path);

    let projection = Projection::All.release(["vendorID"]);
    let (source_columns, fields, chunks) = read_all(&path, FileFormat::Parquet, &projection, 2);

    assert_eq!(source_columns, ["vendorID", "passengerCount", "tripDistance"]);
    assert_eq!(
        fields,
        vec![
            Field::new("passengerCount", ColumnType::Int),
            Field::new("tripDistance", ColumnType::Float),
        ]
    );
    assert_eq!(
        chunks,
        vec![
            vec![
                vec![Value::Int(1), Value::Float(0.0)],
                vec![Value::Null, Value::Float(2.5)],
            ],
            vec![vec![Value::Int(3), Value::Float(7.25)]],
        ]
    );
}

#[test]
fn parquet_garbage_is_a_decode_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.parquet");
    fs::write(&path, b"not parquet at all").expect("write");
    let err = open_reader(
        &LocalFileStore,
        &file_ref(&path),
        &FileFormat::Parquet,
        &Projection::All,
        &ReadOptions::default(),
    )
    .expect_err("invalid file");
    assert!(matches!(err, SourceError::Decode { .. }), "{err}");
}

#[test]
fn delimited_infers_column_types() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("trips.csv");
    fs::write(
        &path,
        "id,fare,paid,notes,\n1,12.5,true,airport,x\n2,7,false,,y\n3,,yes,\"a, b\",z\n",
    )
    .expect("write");

    let (source_columns, fields, chunks) = read_all(
        &path,
        FileFormat::Delimited(DelimitedOptions::default()),
        &Projection::All,
        100,
    );
    assert_eq!(source_columns, ["id", "fare", "paid", "notes", "Column5"]);
    assert_eq!(
        fields.iter().map(|f| f.data_type).collect::<Vec<_>>(),
        vec![
            ColumnType::Int,
            ColumnType::Float,
            ColumnType::Boolean,
            ColumnType::String,
            ColumnType::String,
        ]
    );
    assert_eq!(
        chunks[0][1],
        vec![
            Value::Int(2),
            Value::Float(7.0),
            Value::Boolean(false),
            Value::Null,
            Value::from("y"),
        ]
    );
    assert_eq!(chunks[0][2][3], Value::from("a, b"));
}

#[test]
fn delimited_without_header_names_columns_positionally() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("raw.tsv");
    fs::write(&path, "1\ta\n2\tb\n").expect("write");

    let options = DelimitedOptions {
        delimiter: b'\t',
        header: false,
        infer_column_types: false,
    };
    let projection = Projection::Only(BTreeSet::from(["Column2".to_string()]));
    let (source_columns, fields, chunks) =
        read_all(&path, FileFormat::Delimited(options), &projection, 100);
    assert_eq!(source_columns, ["Column1", "Column2"]);
    assert_eq!(fields, vec![Field::new("Column2", ColumnType::String)]);
    assert_eq!(chunks, vec![vec![vec![Value::from("a")], vec![Value::from("b")]]]);
}

#[test]
fn delimited_duplicate_header_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dup.csv");
    fs::write(&path, "a,b,a\n1,2,3\n").expect("write");
    let err = open_reader(
        &LocalFileStore,
        &file_ref(&path),
        &FileFormat::Delimited(DelimitedOptions::default()),
        &Projection::All,
        &ReadOptions::default(),
    )
    .expect_err("duplicate");
    assert!(err.to_string().contains("duplicate column name `a`"), "{err}");
}

#[test]
fn json_lines_unions_keys_and_stringifies_conflicts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.jsonl");
    fs::write(
        &path,
        "{\"id\": 1, \"score\": 2, \"tag\": \"a\"}\n\n{\"id\": 2, \"score\": 2.5, \"tag\": 7, \"extra\": true}\n",
    )
    .expect("write");

    let (source_columns, fields, chunks) =
        read_all(&path, FileFormat::JsonLines, &Projection::All, 100);
    assert_eq!(source_columns, ["id", "score", "tag", "extra"]);
    assert_eq!(
        fields,
        vec![
            Field::new("id", ColumnType::Int),
            Field::new("score", ColumnType::Float),
            Field::new("tag", ColumnType::String),
            Field::new("extra", ColumnType::Boolean),
        ]
    );
    assert_eq!(
        chunks[0],
        vec![
            vec![Value::Int(1), Value::Float(2.0), Value::from("a"), Value::Null],
            vec![
                Value::Int(2),
                Value::Float(2.5),
                Value::from("7"),
                Value::Boolean(true),
            ],
        ]
    );
}

#[test]
fn json_lines_rejects_non_objects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.jsonl");
    fs::write(&path, "{\"a\": 1}\n[1, 2]\n").expect("write");
    let err = open_reader(
        &LocalFileStore,
        &file_ref(&path),
        &FileFormat::JsonLines,
        &Projection::All,
        &ReadOptions::default(),
    )
    .expect_err("array line");
    assert!(err.to_string().contains("line 2"), "{err}");
}

#[test]
fn delimited_files_stream_past_the_inference_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("long.csv");
    fs::write(&path, "id,note\n1,\n2,\n3,late\n4,\n5,x\n").expect("write");

    let (_, fields, chunks) = read_all(
        &path,
        FileFormat::Delimited(DelimitedOptions::default()),
        &Projection::All,
        2,
    );
    assert_eq!(
        fields,
        vec![
            Field::new("id", ColumnType::Int),
            Field::new("note", ColumnType::String),
        ]
    );
    assert_eq!(
        chunks.iter().map(Vec::len).collect::<Vec<_>>(),
        vec![2, 2, 1]
    );
    assert_eq!(chunks[1][0], vec![Value::Int(3), Value::from("late")]);
}

#[test]
fn delimited_values_after_the_window_must_fit_its_types() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("drift.csv");
    fs::write(&path, "id,fare\n1,2\n2,3\n3,n/a\n").expect("write");

    let options = ReadOptions {
        batch_size: 2,
        ..ReadOptions::default()
    };
    let reader = open_reader(
        &LocalFileStore,
        &file_ref(&path),
        &FileFormat::Delimited(DelimitedOptions::default()),
        &Projection::All,
        &options,
    )
    .expect("open reader");
    let chunks: Vec<_> = reader.collect();
    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].is_ok());
    let err = chunks[1].as_ref().expect_err("n/a is not an int");
    assert!(matches!(err, SourceError::Decode { .. }), "{err}");
    assert!(err.to_string().contains("line 4"), "{err}");
}

#[test]
fn json_lines_stream_past_the_inference_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.jsonl");
    fs::write(
        &path,
        "{\"id\": 1, \"score\": 2.5}\n{\"id\": 2, \"score\": 3}\n{\"id\": 3, \"score\": 1}\n",
    )
    .expect("write");

    let (_, fields, chunks) = read_all(&path, FileFormat::JsonLines, &Projection::All, 1);
    assert_eq!(fields[1], Field::new("score", ColumnType::Float));
    assert_eq!(
        chunks,
        vec![
            vec![vec![Value::Int(1), Value::Float(2.5)]],
            vec![vec![Value::Int(2), Value::Float(3.0)]],
            vec![vec![Value::Int(3), Value::Float(1.0)]],
        ]
    );
}

#[test]
fn json_lines_keys_first_seen_after_the_window_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("late.jsonl");
    fs::write(&path, "{\"id\": 1}\n\n{\"id\": 2, \"extra\": true}\n").expect("write");

    let options = ReadOptions {
        batch_size: 1,
        ..ReadOptions::default()
    };
    let err = open_reader(
        &LocalFileStore,
        &file_ref(&path),
        &FileFormat::JsonLines,
        &Projection::All,
        &options,
    )
    .expect("open reader")
    .collect::<Result<Vec<_>, _>>()
    .expect_err("late key");
    assert!(err.to_string().contains("line 3: key `extra`"), "{err}");
}
