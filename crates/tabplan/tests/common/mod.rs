#![allow(dead_code)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use tabplan::{Engine, EngineConfig, PathPattern};

pub const YEARS: [i64; 5] = [2015, 2016, 2017, 2018, 2019];
pub const MONTHS: [i64; 2] = [1, 2];
pub const ROWS_PER_FILE: usize = 200;

/// Write one month of trips. Every fifth trip has zero distance.
pub fn write_trips(path: &Path, year: i64, month: i64, rows: usize) {
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("vendorID", DataType::Utf8, false),
        ArrowField::new("tripDistance", DataType::Float64, false),
        ArrowField::new("fareAmount", DataType::Float64, false),
        ArrowField::new("storeAndFwdFlag", DataType::Utf8, true),
        ArrowField::new("paymentType", DataType::Int64, false),
        ArrowField::new("tripId", DataType::Int64, false),
    ]));
    let base = (year * 100 + month) * 10_000;
    let vendor: Vec<&str> = (0..rows).map(|i| if i % 2 == 0 { "CMT" } else { "VTS" }).collect();
    let distance: Vec<f64> = (0..rows).map(|i| (i % 5) as f64 * 1.5).collect();
    let fare: Vec<f64> = (0..rows).map(|i| 2.5 + (i % 7) as f64).collect();
    let flag: Vec<Option<&str>> = (0..rows).map(|i| (i % 3 == 0).then_some("N")).collect();
    let payment: Vec<i64> = (0..rows).map(|i| (i % 4) as i64 + 1).collect();
    let id: Vec<i64> = (0..rows).map(|i| base + i as i64).collect();
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vendor)),
        Arc::new(Float64Array::from(distance)),
        Arc::new(Float64Array::from(fare)),
        Arc::new(StringArray::from(flag)),
        Arc::new(Int64Array::from(payment)),
        Arc::new(Int64Array::from(id)),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).expect("batch");
    let mut writer =
        ArrowWriter::try_new(File::create(path).expect("create"), schema, None).expect("writer");
    writer.write(&batch).expect("write");
    writer.close().expect("close");
}

/// `root/green/puYear=YYYY/puMonth=M/part-0.parquet` for every year and month.
pub fn write_taxi_dataset(root: &Path) {
    for year in YEARS {
        for month in MONTHS {
            write_trips(&month_file(root, year, month), year, month, ROWS_PER_FILE);
        }
    }
}

pub fn month_file(root: &Path, year: i64, month: i64) -> PathBuf {
    root.join(format!("green/puYear={year}/puMonth={month}/part-0.parquet"))
}

/// One absolute pattern per year, in year order.
pub fn yearly_patterns(root: &Path) -> Vec<PathPattern> {
    YEARS
        .iter()
        .map(|year| {
            let dir = root.join(format!("green/puYear={year}"));
            PathPattern::pattern(format!("{}/puMonth=*/*.parquet", dir.display()))
        })
        .collect()
}

pub fn engine(max_concurrent_reads: usize) -> Engine {
    Engine::new(EngineConfig {
        max_concurrent_reads,
        ..EngineConfig::default()
    })
}

pub fn write_text(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
    fs::write(path, text).expect("write");
}
