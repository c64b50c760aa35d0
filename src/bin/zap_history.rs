//! Payment history viewer
//!
//! Prints the AutoZap ledger, newest first.
//!
//! Usage:
//!   cargo run --bin zap_history -- [--actor <pubkey>] [--json] [--db <path>]
//!
//! Environment variables:
//!   DB_PATH - ledger file when `--db` is not given (default: payments.db)

use autozap::payment_core::{Ledger, PaymentRecord};
use std::env;
use std::process::ExitCode;

struct Args {
    actor: Option<String>,
    json: bool,
    db_path: String,
}

fn value_after(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|idx| args.get(idx + 1))
        .cloned()
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();

    Args {
        actor: value_after(&args, "--actor"),
        json: args.contains(&"--json".to_string()),
        db_path: value_after(&args, "--db")
            .or_else(|| env::var("DB_PATH").ok())
            .unwrap_or_else(|| "payments.db".to_string()),
    }
}

fn print_text(records: &[PaymentRecord]) {
    println!(
        "{:>6}  {:<20}  {:<16}  {:<16}  {:>8}  {:<8}  reference",
        "id", "created", "actor", "note", "amount", "status"
    );
    for record in records {
        let detail = if record.payment_reference.is_empty() {
            record.failure_reason.clone().unwrap_or_default()
        } else {
            record.payment_reference.clone()
        };
        println!(
            "{:>6}  {:<20}  {:<16}  {:<16}  {:>8}  {:<8}  {}",
            record.attempt_id,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            autozap::short_id(&record.actor_id),
            autozap::short_id(&record.target_post_id),
            record.amount_units,
            record.status,
            detail
        );
    }
    println!("{} record(s)", records.len());
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    if env::args().any(|arg| arg == "--help" || arg == "-h") {
        println!("Usage: zap_history [--actor <pubkey>] [--json] [--db <path>]");
        return ExitCode::SUCCESS;
    }

    let args = parse_args();
    let ledger = match Ledger::open(&args.db_path) {
        Ok(ledger) => ledger,
        Err(e) => {
            log::error!("❌ Failed to open ledger {}: {}", args.db_path, e);
            return ExitCode::from(1);
        }
    };

    let records = match ledger.history(args.actor.as_deref()) {
        Ok(records) => records,
        Err(e) => {
            log::error!("❌ Failed to read payment history: {}", e);
            return ExitCode::from(1);
        }
    };

    if args.json {
        for record in &records {
            match serde_json::to_string(record) {
                Ok(line) => println!("{}", line),
                Err(e) => {
                    log::error!("❌ Failed to encode record {}: {}", record.attempt_id, e);
                    return ExitCode::from(1);
                }
            }
        }
    } else {
        print_text(&records);
    }

    ExitCode::SUCCESS
}
