//! Command-line front end for the upsert engines.
//!
//! # Responsibility
//! - Expose health, upsert, read and race commands over one SQLite file.
//! - Print results as JSON lines on stdout; diagnostics go to the logger.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};
use upsertkit_core::{
    init_logging, open_db_with, DbOptions, FieldMap, KeyedRecord, ListQuery, LogLevel, LogTarget,
    LoggingConfig, RecordService, UpsertOutcome, WriteFailure,
};

#[derive(Parser)]
#[command(
    name = "upsertkit-cli",
    version,
    about = "Race-safe update-or-create over SQLite"
)]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "UPSERTKIT_DB", default_value = "upsertkit.db")]
    db: PathBuf,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, env = "UPSERTKIT_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// Absolute directory for rotated log files; stderr when unset
    #[arg(long, env = "UPSERTKIT_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Milliseconds a writer waits for the database lock
    #[arg(long, env = "UPSERTKIT_BUSY_TIMEOUT_MS", default_value_t = 5_000)]
    busy_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print core liveness and version
    Health,
    /// Race-safe upsert of a JSON body such as {"key":"5","data":"5"}
    Upsert {
        #[arg(long)]
        json: String,
    },
    /// Query-then-write upsert without collision handling
    UpsertNaive {
        #[arg(long)]
        json: String,
    },
    /// Print the record stored under a key
    Get {
        #[arg(long)]
        key: String,
    },
    /// Print records, most recently updated first
    List {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Fire concurrent upserts at the same keys and report the result
    Race {
        /// Distinct keys, named "0".."N-1"
        #[arg(long, default_value_t = 10)]
        keys: usize,
        /// Concurrent submissions per key
        #[arg(long, default_value_t = 3)]
        repeat: usize,
        /// Use the naive engine instead of the safe one
        #[arg(long)]
        naive: bool,
    },
}

#[derive(Debug, Default)]
struct RaceReport {
    succeeded: usize,
    failed: usize,
    collisions: usize,
    recovered: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&logging_config(&cli)).context("logging init failed")?;

    let options = DbOptions {
        busy_timeout: Duration::from_millis(cli.busy_timeout_ms),
        ..DbOptions::default()
    };

    match cli.command {
        Command::Health => {
            println!(
                "{}",
                serde_json::json!({
                    "status": upsertkit_core::ping(),
                    "version": upsertkit_core::core_version(),
                })
            );
        }
        Command::Upsert { json } => {
            let mut service = open_service(&cli.db, &options)?;
            let upserted = service.upsert(parse_body(&json)?)?;
            println!(
                "{}",
                serde_json::json!({
                    "outcome": upserted.outcome.as_str(),
                    "record": upserted.entity,
                })
            );
        }
        Command::UpsertNaive { json } => {
            let mut service = open_service(&cli.db, &options)?;
            service.upsert_naive(parse_body(&json)?)?;
            println!("{}", serde_json::json!({ "status": "ok" }));
        }
        Command::Get { key } => {
            let service = open_service(&cli.db, &options)?;
            match service.get_by_key(&key)? {
                Some(record) => println!("{}", serde_json::to_string(&record)?),
                None => bail!("no record for key `{key}`"),
            }
        }
        Command::List { limit, offset } => {
            let service = open_service(&cli.db, &options)?;
            for record in service.list(&ListQuery { limit, offset })? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Race {
            keys,
            repeat,
            naive,
        } => {
            if keys == 0 || repeat == 0 {
                bail!("--keys and --repeat must be positive");
            }
            // Migrate once up front so racing threads only contend on rows.
            let rows_before = open_service(&cli.db, &options)?.count()?;
            let started_at = Instant::now();
            let report = race(&cli.db, &options, keys, repeat, naive)?;
            let rows = open_service(&cli.db, &options)?.count()?;
            info!(
                "event=race module=cli status=ok engine={} calls={} failed={} duration_ms={}",
                engine_name(naive),
                keys * repeat,
                report.failed,
                started_at.elapsed().as_millis()
            );
            println!(
                "{}",
                serde_json::json!({
                    "engine": engine_name(naive),
                    "calls": keys * repeat,
                    "succeeded": report.succeeded,
                    "failed": report.failed,
                    "collisions": report.collisions,
                    "recovered_collisions": report.recovered,
                    "rows_before": rows_before,
                    "rows": rows,
                })
            );
        }
    }

    Ok(())
}

fn logging_config(cli: &Cli) -> LoggingConfig {
    LoggingConfig {
        level: cli.log_level.unwrap_or_else(LogLevel::build_default),
        target: cli
            .log_dir
            .clone()
            .map_or(LogTarget::Stderr, LogTarget::Directory),
    }
}

fn open_service(path: &Path, options: &DbOptions) -> Result<RecordService> {
    let conn = open_db_with(path, options)
        .with_context(|| format!("cannot open database `{}`", path.display()))?;
    Ok(RecordService::try_new(conn)?)
}

fn parse_body(json: &str) -> Result<FieldMap> {
    match serde_json::from_str::<serde_json::Value>(json).context("request body is not valid JSON")? {
        serde_json::Value::Object(fields) => Ok(fields),
        _ => bail!("request body must be a JSON object"),
    }
}

fn engine_name(naive: bool) -> &'static str {
    if naive {
        "naive"
    } else {
        "safe"
    }
}

/// Runs `keys * repeat` upserts, one thread and connection per call, all
/// released at once.
fn race(
    path: &Path,
    options: &DbOptions,
    keys: usize,
    repeat: usize,
    naive: bool,
) -> Result<RaceReport> {
    let calls = keys * repeat;
    let barrier = Barrier::new(calls);

    let results = thread::scope(|scope| {
        let handles = (0..calls)
            .map(|call| {
                let barrier = &barrier;
                scope.spawn(move || -> Result<CallResult> {
                    let key = (call % keys).to_string();
                    // Wait even when opening failed so the other workers are released.
                    let service = open_service(path, options);
                    barrier.wait();
                    let mut service = service?;
                    Ok(submit(&mut service, &key, naive))
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("race worker panicked")))
            })
            .collect::<Vec<_>>()
    });

    let mut report = RaceReport::default();
    for result in results {
        match result? {
            CallResult::Ok { recovered } => {
                report.succeeded += 1;
                if recovered {
                    report.recovered += 1;
                }
            }
            CallResult::Failed { collision } => {
                report.failed += 1;
                if collision {
                    report.collisions += 1;
                }
            }
        }
    }
    Ok(report)
}

enum CallResult {
    Ok { recovered: bool },
    Failed { collision: bool },
}

fn submit(service: &mut RecordService, key: &str, naive: bool) -> CallResult {
    let fields = fields_of(&KeyedRecord::new(key, key));
    let result = if naive {
        service.upsert_naive(fields).map(|()| false)
    } else {
        service
            .upsert(fields)
            .map(|upserted| upserted.outcome == UpsertOutcome::MergedAfterCollision)
    };

    match result {
        Ok(recovered) => CallResult::Ok { recovered },
        Err(err) => {
            let collision = matches!(
                err.failure::<KeyedRecord>(KeyedRecord::KEY_COLUMNS),
                Some(WriteFailure::KeyCollision(_))
            );
            CallResult::Failed { collision }
        }
    }
}

fn fields_of(record: &KeyedRecord) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("key".to_string(), record.key.clone().into());
    fields.insert("data".to_string(), record.data.clone().into());
    fields
}
