//! Operator CLI over a campus database.
//!
//! # Usage
//! - `campus_cli <db-path> status` prints seats and beds left per pool.
//! - `campus_cli <db-path> verify [pool-id]` reconciles pool counters with
//!   active allocations and exits non-zero on any mismatch.
//!
//! Set `CAMPUS_LOG_DIR` to an absolute path to also write rolling logs.

use campus_core::db::open_db;
use campus_core::{
    default_log_level, init_logging, AllocationEngine, AllocationError, PoolId, ResourcePool,
};
use log::warn;
use std::env;
use std::process::ExitCode;

const USAGE: &str = "usage: campus_cli <db-path> [status|verify [pool-id]]";

enum Command {
    Status,
    Verify(Option<PoolId>),
}

fn main() -> ExitCode {
    if let Ok(log_dir) = env::var("CAMPUS_LOG_DIR") {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let args: Vec<String> = env::args().skip(1).collect();
    let (db_path, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(db_path, command) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<(&str, Command), String> {
    let Some(db_path) = args.first() else {
        return Err("missing database path".to_string());
    };
    let command = match args.get(1).map(String::as_str) {
        None | Some("status") => Command::Status,
        Some("verify") => {
            let pool_id = args
                .get(2)
                .map(|raw| {
                    PoolId::parse_str(raw).map_err(|err| format!("invalid pool id `{raw}`: {err}"))
                })
                .transpose()?;
            Command::Verify(pool_id)
        }
        Some(other) => return Err(format!("unknown command `{other}`")),
    };
    Ok((db_path.as_str(), command))
}

fn run(db_path: &str, command: Command) -> Result<ExitCode, String> {
    let conn = open_db(db_path).map_err(|err| err.to_string())?;
    let engine = AllocationEngine::try_new(&conn).map_err(|err| err.to_string())?;

    match command {
        Command::Status => {
            let pools = engine
                .store()
                .list_pools(None)
                .map_err(|err| err.to_string())?;
            if pools.is_empty() {
                println!("no pools defined");
            }
            for pool in &pools {
                print_status(pool);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify(target) => {
            let pool_ids = match target {
                Some(pool_id) => vec![pool_id],
                None => engine
                    .store()
                    .list_pools(None)
                    .map_err(|err| err.to_string())?
                    .into_iter()
                    .map(|pool| pool.pool_id)
                    .collect(),
            };

            let mut mismatches = 0usize;
            for pool_id in pool_ids {
                match engine.verify_pool(pool_id) {
                    Ok(snapshot) => println!(
                        "ok        {pool_id} occupied={}/{}",
                        snapshot.occupied, snapshot.capacity
                    ),
                    Err(AllocationError::InvariantViolation(message)) => {
                        mismatches += 1;
                        println!("mismatch  {pool_id} {message}");
                    }
                    Err(err) => return Err(err.to_string()),
                }
            }

            if mismatches > 0 {
                warn!("event=verify_pools module=cli status=error mismatches={mismatches}");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_status(pool: &ResourcePool) {
    let snapshot = pool.snapshot();
    println!(
        "{:<10} {:<24} {}/{} {}s taken, {} free ({:.1}%)",
        pool.category.as_str(),
        pool.label,
        snapshot.occupied,
        snapshot.capacity,
        pool.category.unit(),
        snapshot.available(),
        snapshot.occupancy_percent()
    );
}
