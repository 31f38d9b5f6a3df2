//! CLI entry point for the order/lines cascade demo.
//!
//! # Responsibility
//! - Exercise `cascade_core` end to end against a SQLite file.
//! - Keep output deterministic JSON for quick local checks.

mod demo;

use cascade_core::{
    init_logging, open_db, open_db_in_memory, CascadeReport, CascadeService, LoggingConfig,
    RecordId, RelationalRecord, SqliteRecordStore,
};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::{json, Value as JsonValue};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Cascading has-many demo over orders and lines")]
struct Args {
    /// SQLite database file; in-memory when omitted.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Directory for rolling log files; logging is off when omitted.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    /// One of trace|debug|info|warn|error.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or update an order and its lines from a JSON form payload.
    Submit {
        /// Payload file shaped like `{"Order": {...}, "OrderLine": [...]}`.
        #[arg(long)]
        data: PathBuf,
        /// Existing order to update.
        #[arg(long)]
        id: Option<RecordId>,
    },
    /// Print an order with its lines.
    Show {
        #[arg(long)]
        id: RecordId,
    },
    /// Delete an order together with its lines.
    Remove {
        #[arg(long)]
        id: RecordId,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command fully succeeded.
fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    if let Some(log_dir) = &args.log_dir {
        let log_dir = std::env::current_dir()?.join(log_dir);
        let mut config = LoggingConfig::new(log_dir);
        if let Some(level) = &args.log_level {
            config = config.with_level(level.as_str());
        }
        init_logging(&config)?;
    }

    let Some(cmd) = args.cmd else {
        println!("cascade_core ping={}", cascade_core::ping());
        println!("cascade_core version={}", cascade_core::core_version());
        return Ok(true);
    };

    let conn = match &args.db {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    demo::ensure_schema(&conn)?;
    let order = demo::order_entity()?;
    let service = CascadeService::new(SqliteRecordStore::try_new(
        &conn,
        std::slice::from_ref(&order),
    )?);

    match cmd {
        Command::Submit { data, id } => {
            let payload: JsonValue = serde_json::from_str(&std::fs::read_to_string(&data)?)?;
            let mut target = match id {
                Some(id) => service.load(&order, id)?,
                None => RelationalRecord::new(order.clone()),
            };
            let report =
                service.submit_in_transaction(&mut target, &payload, &[demo::LINES_RELATION])?;
            info!(
                "event=cli_submit module=cli status={} id={:?}",
                if report.is_success() { "ok" } else { "error" },
                target.record().id()
            );
            let order_value = order_json(&service, &mut target)?;
            print_json(&json!({ "report": report_json(&report), "order": order_value }))?;
            Ok(report.is_success())
        }
        Command::Show { id } => {
            let mut target = service.load(&order, id)?;
            print_json(&order_json(&service, &mut target)?)?;
            Ok(true)
        }
        Command::Remove { id } => {
            let report = service.remove_in_transaction(&order, id)?;
            print_json(&json!({ "report": report_json(&report) }))?;
            Ok(report.is_success())
        }
    }
}

fn order_json(
    service: &CascadeService<SqliteRecordStore<'_>>,
    target: &mut RelationalRecord,
) -> Result<JsonValue, Box<dyn Error>> {
    let mut value = target.record().to_json();
    let lines = target
        .relation(service.store(), demo::LINES_RELATION)?
        .iter()
        .map(|line| line.to_json())
        .collect::<Vec<_>>();
    if let JsonValue::Object(map) = &mut value {
        map.insert(demo::LINES_RELATION.to_string(), JsonValue::Array(lines));
    }
    Ok(value)
}

fn report_json(report: &CascadeReport) -> JsonValue {
    json!({
        "success": report.is_success(),
        "saved": report.saved(),
        "deleted": report.deleted(),
        "failures": report
            .failures()
            .iter()
            .map(|failure| failure.to_string())
            .collect::<Vec<_>>(),
    })
}

fn print_json(value: &JsonValue) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
