//! Purpose: `cellshift` CLI entry point: validate job files and run them over table dumps.
//! Role: Binary crate root; parses args, runs commands, emits JSON lines on stdout.
//! Invariants: Records and deletes go to stdout, one JSON object per line, in key order.
//! Invariants: Errors are emitted as JSON on stderr when stderr is not a terminal.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::error::Error as StdError;
use std::fs::File;
use std::io::{self, BufReader, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::error::ErrorKind as ClapErrorKind;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use cellshift::api::{
    ChangeRow, Error, ErrorKind, JobPlan, JobSpec, JsonlSink, MemoryStore, run_partitions,
    split_partitions, to_exit_code,
};

#[derive(Parser)]
#[command(
    name = "cellshift",
    version,
    about = "Migrate wide-column change history into normalized records",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a job over a JSONL table dump and print records and deletes as JSON lines
    Run {
        /// Job file (JSON): schema, selection, filter, documents and window
        #[arg(long)]
        job: PathBuf,
        /// Table dump, one cell per line: {"row","family","qualifier","value","ts","kind"}
        #[arg(long)]
        table: PathBuf,
        /// Number of key-range partitions processed in parallel
        #[arg(long, default_value_t = 1)]
        partitions: usize,
        /// Print partition statistics to stderr when done
        #[arg(long)]
        stats: bool,
    },
    /// Validate a job file without reading any rows
    Check {
        #[arg(long)]
        job: PathBuf,
    },
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if err.kind() == ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand {
                    2
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `cellshift --help`."));
            }
        },
    };

    init_tracing();
    let result = match cli.command {
        Command::Run {
            job,
            table,
            partitions,
            stats,
        } => run_job(&job, &table, partitions, stats),
        Command::Check { job } => check_job(&job),
    };
    result.map(|()| 0).map_err(add_hint)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn load_job(path: &Path) -> Result<(JobSpec, JobPlan), Error> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to read job file {}", path.display()))
            .with_source(err)
    })?;
    let spec = JobSpec::from_json(&text)?;
    let plan = spec.build_plan()?;
    Ok((spec, plan))
}

fn check_job(path: &Path) -> Result<(), Error> {
    let (spec, plan) = load_job(path)?;
    spec.job.window()?;
    let schema = plan.schema();
    let summary = json!({
        "ok": true,
        "families": plan.required_families().collect::<Vec<_>>(),
        "static_columns": schema.static_columns().count(),
        "dynamic_columns": schema.dynamic_columns().count(),
        "predicate_leaves": plan.predicate().map_or(0, |predicate| predicate.leaf_count()),
        "documents": plan.documents().len(),
        "incremental": spec.job.incremental,
    });
    emit_json(&summary)
}

fn run_job(job: &Path, table: &Path, partitions: usize, print_stats: bool) -> Result<(), Error> {
    let (spec, plan) = load_job(job)?;
    let window = spec.job.window()?;
    let file = File::open(table).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to open table dump {}", table.display()))
            .with_source(err)
    })?;
    let store = MemoryStore::from_jsonl(BufReader::new(file))?;

    let rows: Vec<ChangeRow> = if spec.job.incremental {
        store.changes(window).collect()
    } else {
        store.latest(window).collect()
    };
    let (stats, sinks) = run_partitions(
        &plan,
        spec.job,
        &store,
        split_partitions(rows, partitions),
        |_| JsonlSink::new(Vec::new()),
    )?;

    let mut stdout = io::stdout().lock();
    for sink in sinks {
        let bytes = sink.into_inner()?;
        stdout.write_all(&bytes).map_err(stdout_error)?;
    }
    stdout.flush().map_err(stdout_error)?;

    if print_stats {
        let value = json!({ "stats": stats.to_json() });
        eprintln!("{value}");
    }
    Ok(())
}

fn emit_json(value: &Value) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to encode output")
            .with_source(err)
    })?;
    writeln!(stdout).map_err(stdout_error)
}

fn stdout_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write stdout")
        .with_source(err)
}

fn add_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Io => err.with_hint("I/O error. Check the paths and that the files are readable."),
        ErrorKind::Validation => {
            err.with_hint("The job does not match its schema. Fix the job file and rerun `cellshift check`.")
        }
        ErrorKind::Internal => err.with_hint(
            "Unexpected internal failure. Retry with RUST_BACKTRACE=1 and share command/context if it persists.",
        ),
        _ => err,
    }
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::Schema => "schema error".to_string(),
        ErrorKind::Validation => "validation error".to_string(),
        ErrorKind::MalformedRowKey => "malformed row key".to_string(),
        ErrorKind::MalformedGroup => "malformed dynamic group".to_string(),
        ErrorKind::MalformedDocument => "malformed document".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(row_key) = err.row_key() {
        inner.insert("row".to_string(), json!(String::from_utf8_lossy(row_key)));
    }
    if let Some(family) = err.family() {
        inner.insert("family".to_string(), json!(family));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}
