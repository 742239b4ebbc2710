use proptest::prelude::*;
use tabplan::{artifact, DelimitedOptions, FileFormat, PathPattern, Table, TypeConversion};

/// Column names YAML would read as something other than a string if written bare.
const NAMES: &[&str] = &[
    "vendor", "null", "~", "123", "1.5", "true", "yes", "a b", "a: b", "#tag", "- x", "fare]",
];

const PREDICATES: &[&str] = &[
    "tripDistance > 0",
    "fare <= 10.5 and not vendor == \"CMT\"",
    "[pickup zone] != \"JFK \"\"T4\"\"\" or -x * 2 >= 1e300",
    "a % 3 == 1 or b != null",
    "x < 1.7976931348623157e308",
];

const PARTITION_FORMATS: &[&str] = &[
    "/puYear={year}/puMonth={month}",
    "year={year}",
    "/{dataset}/{file}",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y %H:%M", "%Y%m%dT%H%M%S%.f"];

#[derive(Clone, Debug)]
enum Op {
    Sample(f64, Option<u64>),
    Filter(&'static str),
    Drop(Vec<&'static str>),
    Select(Vec<&'static str>),
    Partition(&'static str),
    Convert(Vec<(&'static str, TypeConversion)>),
}

fn names() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(NAMES, 1..=4).prop_shuffle()
}

fn conversion() -> impl Strategy<Value = TypeConversion> {
    prop_oneof![
        Just(TypeConversion::Int),
        Just(TypeConversion::Float),
        Just(TypeConversion::Boolean),
        Just(TypeConversion::String),
        prop::sample::subsequence(DATETIME_FORMATS, 0..=2)
            .prop_shuffle()
            .prop_map(|formats| TypeConversion::datetime(formats)),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (
            (0.0f64..=1.0).prop_filter("positive", |p| *p > 0.0),
            prop::option::of(any::<u64>()),
        )
            .prop_map(|(p, seed)| Op::Sample(p, seed)),
        prop::sample::select(PREDICATES).prop_map(Op::Filter),
        names().prop_map(Op::Drop),
        names().prop_map(Op::Select),
        prop::sample::select(PARTITION_FORMATS).prop_map(Op::Partition),
        names()
            .prop_flat_map(|names| {
                let len = names.len();
                (Just(names), prop::collection::vec(conversion(), len))
            })
            .prop_map(|(names, targets)| Op::Convert(names.into_iter().zip(targets).collect())),
    ]
}

fn format() -> impl Strategy<Value = FileFormat> {
    prop_oneof![
        Just(FileFormat::Parquet),
        Just(FileFormat::JsonLines),
        (
            prop::sample::select(&[b',', b'|', b'\t', b';', b' ', b'\''][..]),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(delimiter, header, infer_column_types)| {
                FileFormat::Delimited(DelimitedOptions {
                    delimiter,
                    header,
                    infer_column_types,
                })
            }),
    ]
}

fn path() -> impl Strategy<Value = PathPattern> {
    prop_oneof![
        "[a-z]{1,6}(/[a-z0-9=]{1,6}){0,2}\\.parquet".prop_map(PathPattern::file),
        "[a-z]{1,6}(/[a-z0-9 ]{1,6}){0,2}".prop_map(PathPattern::folder),
        "green/puYear=\\*/[a-z]{1,3}[*?]?\\.csv".prop_map(PathPattern::pattern),
    ]
}

fn table() -> impl Strategy<Value = Table> {
    (
        prop::collection::vec(path(), 1..=3),
        format(),
        any::<bool>(),
        prop::collection::vec(op(), 0..6),
    )
        .prop_map(|(paths, format, include_path_column, ops)| {
            let mut table = Table::from_paths(paths, format).expect("valid read");
            if include_path_column {
                table = table.with_path_column();
            }
            for op in ops {
                table = match op {
                    Op::Sample(p, seed) => table.take_random_sample(p, seed),
                    Op::Filter(text) => table.filter(text),
                    Op::Drop(names) => table.drop_columns(names),
                    Op::Select(names) => table.select_columns(names),
                    Op::Partition(format) => table.extract_columns_from_partition_format(format),
                    Op::Convert(mapping) => table.convert_column_types(mapping),
                }
                .expect("valid step");
            }
            table
        })
}

proptest! {
    #[test]
    fn constructible_plans_reload_unchanged(table in table()) {
        let text = table
            .to_artifact_string()
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
        let steps = artifact::deserialize(&text)
            .map_err(|err| TestCaseError::fail(format!("{err}\n{text}")))?;
        prop_assert_eq!(steps.as_slice(), table.steps(), "artifact:\n{}", text);
    }
}
