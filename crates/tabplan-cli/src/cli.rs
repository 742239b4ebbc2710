use std::io::Write;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Number, Value as JsonValue};
use tabplan::{Engine, EngineConfig, MaterializedTable, PartitionTyping, Table, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "tabplan", version)]
#[command(about = "Inspect saved table artifacts (MLTable files) and preview their data.")]
pub struct Args {
    /// Files read at the same time (default: TABPLAN_MAX_CONCURRENT_READS or the CPU count, at most 8).
    #[arg(long, global = true)]
    max_concurrent_reads: Option<usize>,

    /// Rows decoded per chunk.
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Retries for transient I/O failures; 0 disables retrying.
    #[arg(long, global = true)]
    io_retries: Option<usize>,

    /// How partition values are typed: `infer-integer` or `all-string`.
    #[arg(long, global = true)]
    partition_typing: Option<PartitionTyping>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the first rows of a saved table.
    Show {
        /// Artifact directory, artifact file or `file://` URI.
        reference: String,

        /// Number of rows to print.
        #[arg(short = 'n', long = "rows", default_value_t = 10)]
        rows: usize,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print a saved table's artifact in canonical form.
    Describe {
        reference: String,
    },
    /// Check that a saved table loads and that its paths match at least one file.
    Validate {
        reference: String,

        /// List every resolved file.
        #[arg(long)]
        list: bool,
    },
}

pub fn run() -> Result<()> {
    run_with_args(Args::parse())
}

pub fn run_with_args(args: Args) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(&args, &mut out)
}

fn engine_config(args: &Args) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env().context("reading TABPLAN_* settings")?;
    if let Some(reads) = args.max_concurrent_reads {
        config.max_concurrent_reads = reads;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(retries) = args.io_retries {
        config.retry.max_retries = retries;
    }
    if let Some(typing) = args.partition_typing {
        config.partition_typing = typing;
    }
    config.validate()?;
    Ok(config)
}

fn load(reference: &str) -> Result<Table> {
    Table::load(reference).with_context(|| format!("loading table from {reference}"))
}

fn execute(args: &Args, out: &mut impl Write) -> Result<()> {
    match &args.command {
        Command::Show {
            reference,
            rows,
            format,
        } => {
            let table = load(reference)?;
            let engine = Engine::new(engine_config(args)?);
            let preview = engine
                .materialize_bounded(&table, *rows)
                .with_context(|| format!("materializing {reference}"))?;
            match format {
                OutputFormat::Text => writeln!(out, "{preview}")?,
                OutputFormat::Json => {
                    serde_json::to_writer(&mut *out, &to_json(&preview))?;
                    out.write_all(b"\n")?;
                }
            }
        }
        Command::Describe { reference } => {
            let table = load(reference)?;
            out.write_all(table.to_artifact_string()?.as_bytes())?;
        }
        Command::Validate { reference, list } => {
            let table = load(reference)?;
            let engine = Engine::new(engine_config(args)?);
            let files = engine
                .resolve_files(&table)
                .with_context(|| format!("resolving the paths of {reference}"))?;
            if *list {
                for file in &files {
                    writeln!(out, "{}", file.path.display())?;
                }
            }
            log::info!("{reference}: {} step(s)", table.steps().len());
            writeln!(out, "ok: {} file(s) matched", files.len())?;
        }
    }
    Ok(())
}

/// Rows as an array of `{column: value}` objects.
fn to_json(table: &MaterializedTable) -> JsonValue {
    let names = table.column_names();
    let rows = table
        .rows()
        .iter()
        .map(|row| {
            let object: Map<String, JsonValue> = names
                .iter()
                .zip(row)
                .map(|(name, value)| (name.to_string(), json_value(value)))
                .collect();
            JsonValue::Object(object)
        })
        .collect();
    JsonValue::Array(rows)
}

fn json_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Int(v) => JsonValue::Number((*v).into()),
        // NaN and infinities have no JSON form.
        Value::Float(v) => Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number),
        Value::Boolean(v) => JsonValue::Bool(*v),
        Value::String(v) => JsonValue::String(v.to_string()),
        Value::DateTime(_) => JsonValue::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).expect("valid arguments")
    }

    #[test]
    fn engine_flags_are_accepted_after_the_subcommand() {
        let args = parse(&[
            "tabplan",
            "show",
            "out/table",
            "-n",
            "3",
            "--format",
            "json",
            "--max-concurrent-reads",
            "2",
            "--partition-typing",
            "all-string",
        ]);
        assert_eq!(args.max_concurrent_reads, Some(2));
        assert_eq!(args.partition_typing, Some(PartitionTyping::AllString));
        let Command::Show {
            reference,
            rows,
            format,
        } = &args.command
        else {
            panic!("expected show, got {:?}", args.command);
        };
        assert_eq!(reference, "out/table");
        assert_eq!(*rows, 3);
        assert_eq!(*format, OutputFormat::Json);
    }

    #[test]
    fn bad_partition_typing_is_a_usage_error() {
        let err = Args::try_parse_from(["tabplan", "--partition-typing", "dates", "describe", "x"])
            .expect_err("rejected");
        assert!(err.to_string().contains("unknown partition typing"), "{err}");
    }

    #[test]
    fn zero_reads_fail_validation() {
        let args = parse(&["tabplan", "--max-concurrent-reads", "0", "validate", "x"]);
        assert!(engine_config(&args).is_err());
    }

    #[test]
    fn json_cells_keep_their_types() {
        assert_eq!(json_value(&Value::Int(2015)), serde_json::json!(2015));
        assert_eq!(json_value(&Value::Float(1.5)), serde_json::json!(1.5));
        assert_eq!(json_value(&Value::Float(f64::NAN)), JsonValue::Null);
        assert_eq!(json_value(&Value::from("CMT")), serde_json::json!("CMT"));
        assert_eq!(json_value(&Value::Null), JsonValue::Null);
    }

    #[test]
    fn missing_artifacts_report_the_reference() {
        let args = parse(&["tabplan", "describe", "/definitely/not/here"]);
        let mut out = Vec::new();
        let err = execute(&args, &mut out).expect_err("missing");
        assert!(
            err.to_string().contains("/definitely/not/here"),
            "{err:#}"
        );
        assert!(out.is_empty());
    }
}
