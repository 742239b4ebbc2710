mod common;

use std::collections::HashMap;
use std::path::PathBuf;

use pretty_assertions::assert_eq;
use tabplan::{
    ArtifactResolver, DelimitedOptions, Error, PathPattern, SaveOptions, Table, Value,
    ARTIFACT_FILE_NAME,
};

use common::{engine, write_text};

fn csv_table(root: &std::path::Path) -> Table {
    write_text(&root.join("data/jan.csv"), "vendor,fare\nCMT,2.5\nVTS,7\n");
    write_text(&root.join("data/feb.csv"), "vendor,fare\nCMT,11\n");
    Table::from_delimited_files(
        [PathPattern::pattern("data/*.csv")],
        DelimitedOptions::default(),
    )
    .and_then(|t| t.filter("fare > 3"))
    .expect("table")
    .with_base(root)
}

#[test]
fn saving_elsewhere_keeps_relative_paths_reachable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let table = csv_table(dir.path());
    let expected = engine(1).materialize(&table).expect("materialize");
    assert_eq!(expected.num_rows(), 2);

    let out = dir.path().join("exports/fares");
    let artifact = table.save(&out, &SaveOptions::default()).expect("save");
    assert_eq!(artifact, out.join(ARTIFACT_FILE_NAME));

    let text = std::fs::read_to_string(&artifact).expect("read artifact");
    let absolute = dir.path().join("data/*.csv").display().to_string();
    assert!(text.contains(&absolute), "{text}");

    let reloaded = Table::load(&out.display().to_string()).expect("load");
    assert_eq!(engine(1).materialize(&reloaded).expect("materialize"), expected);
}

#[test]
fn saving_next_to_the_data_keeps_paths_relative() {
    let dir = tempfile::tempdir().expect("tempdir");
    let table = csv_table(dir.path());
    let artifact = table.save(dir.path(), &SaveOptions::default()).expect("save");
    let text = std::fs::read_to_string(&artifact).expect("read artifact");
    assert!(text.contains("- pattern: data/*.csv\n"), "{text}");

    let uri = format!("file://{}", artifact.display());
    let reloaded = Table::load(&uri).expect("load by uri");
    assert_eq!(reloaded.base(), Some(dir.path()));
    assert_eq!(
        engine(1).materialize(&reloaded).expect("materialize"),
        engine(1).materialize(&table).expect("materialize")
    );
}

#[test]
fn existing_artifacts_are_only_replaced_on_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    let table = csv_table(dir.path());
    let out = dir.path().join("saved");
    table.save(&out, &SaveOptions::default()).expect("first save");

    let narrower = table.select_columns(["vendor"]).expect("table");
    let err = narrower
        .save(&out, &SaveOptions::default())
        .expect_err("already saved");
    assert!(matches!(err, Error::DestinationExists { .. }), "{err}");
    assert_eq!(
        Table::load(&out.display().to_string()).expect("load").steps().len(),
        2,
        "the first artifact is untouched"
    );

    narrower
        .save(&out, &SaveOptions { overwrite: true })
        .expect("overwrite");
    let reloaded = Table::load(&out.display().to_string()).expect("load");
    assert_eq!(reloaded.steps(), narrower.steps());
    let entries: Vec<_> = std::fs::read_dir(&out)
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(entries, [ARTIFACT_FILE_NAME]);
}

#[test]
fn missing_artifacts_are_reported_by_reference() {
    let dir = tempfile::tempdir().expect("tempdir");
    let reference = dir.path().join("nowhere").display().to_string();
    match Table::load(&reference) {
        Err(Error::ArtifactNotFound { reference: r }) => assert_eq!(r, reference),
        other => panic!("expected ArtifactNotFound, got {other:?}"),
    }
    assert!(matches!(
        Table::load("https://example.com/tables/green"),
        Err(Error::ArtifactNotFound { .. })
    ));
}

/// Resolves catalog names to directories on local disk.
struct Catalog(HashMap<String, PathBuf>);

impl ArtifactResolver for Catalog {
    fn resolve(&self, reference: &str) -> tabplan::Result<PathBuf> {
        self.0
            .get(reference)
            .map(|dir| dir.join(ARTIFACT_FILE_NAME))
            .ok_or_else(|| Error::ArtifactNotFound {
                reference: reference.to_string(),
            })
    }
}

#[test]
fn custom_resolvers_locate_artifacts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let table = csv_table(dir.path());
    table.save(dir.path(), &SaveOptions::default()).expect("save");

    let catalog = Catalog(HashMap::from([(
        "tables://fares/1".to_string(),
        dir.path().to_path_buf(),
    )]));
    let loaded = Table::load_with("tables://fares/1", &catalog).expect("load");
    assert_eq!(loaded.steps(), table.steps());
    assert!(matches!(
        Table::load_with("tables://fares/2", &catalog),
        Err(Error::ArtifactNotFound { .. })
    ));
}

#[test]
fn handwritten_artifacts_resolve_against_their_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_text(
        &dir.path().join("logs/day=1/events.jsonl"),
        "{\"user\": \"a\", \"ms\": 12}\n\n{\"user\": \"b\", \"ms\": 30, \"extra\": true}\n",
    );
    write_text(
        &dir.path().join(ARTIFACT_FILE_NAME),
        "\
type: mltable
paths:
- folder: logs
transformations:
- read_json_lines:
- extract_columns_from_partition_format:
    partition_format: /day={day}
- filter: ms > 20
- keep_columns: [day, user]
",
    );

    let table = Table::load(&dir.path().display().to_string()).expect("load");
    let result = engine(1).materialize(&table).expect("materialize");
    assert_eq!(result.column_names(), ["day", "user"]);
    assert_eq!(result.rows(), &[vec![Value::Int(1), Value::from("b")]]);
}

#[test]
fn unknown_transformations_are_rejected_on_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_text(
        &dir.path().join(ARTIFACT_FILE_NAME),
        "paths:\n- file: a.parquet\ntransformations:\n- read_parquet:\n- sort_rows: [a]\n",
    );
    match Table::load(&dir.path().display().to_string()) {
        Err(Error::InvalidArtifact { key, .. }) => assert_eq!(key, "sort_rows"),
        other => panic!("expected InvalidArtifact, got {other:?}"),
    }
}
