//! HomeFlow command-line entry point.
//!
//! # Responsibility
//! - Verify `homeflow_core` linkage (`ping`).
//! - Run scheduler passes and inspect the sync queue of a local database.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use homeflow_core::repo::{SqliteSyncQueueRepository, SyncQueueRepository};
use homeflow_core::sync::engine::LAST_SYNC_AT_KEY;
use homeflow_core::{
    init_logging, open_db, CoreConfig, FamilyLocks, GenerateRequest, SchedulerService,
    SqliteFamilyRepository,
};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "homeflow", version, about = "Household chore rotation tools")]
struct Cli {
    /// Absolute directory for rolling log files.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// JSON config file; missing files fall back to defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prints core ping and version.
    Ping,
    /// Regenerates future assignments of one family.
    Generate {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        family: Uuid,
        /// Explicit horizon; omitted uses the adaptive horizon.
        #[arg(long)]
        days: Option<u32>,
        /// First schedulable day (YYYY-MM-DD); defaults to today.
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Shows pending and dead-lettered sync changes.
    Queue {
        #[arg(long)]
        db: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::default(),
    };
    if let Some(log_dir) = &cli.log_dir {
        init_logging(&config.log_level, log_dir)?;
    }

    match cli.command {
        Command::Ping => {
            println!("homeflow_core ping={}", homeflow_core::ping());
            println!("homeflow_core version={}", homeflow_core::core_version());
        }
        Command::Generate {
            db,
            family,
            days,
            today,
        } => {
            let conn = open_db(&db)?;
            let service = SchedulerService::new(
                SqliteFamilyRepository::new(&conn, family),
                config.scheduler,
                Arc::new(FamilyLocks::new()),
            );
            let created = match today {
                Some(today) => service.generate_assignments(&GenerateRequest {
                    today,
                    horizon_days: days,
                })?,
                None => service.generate_assignments_today(days)?,
            };
            info!(
                "event=cli_generate module=cli status=ok family_id={} created={}",
                family,
                created.len()
            );
            println!("created={}", created.len());
            for assignment in created {
                println!(
                    "{} chore={} member={}",
                    assignment.due_date, assignment.chore_id, assignment.member_id
                );
            }
        }
        Command::Queue { db } => {
            let conn = open_db(&db)?;
            let queue = SqliteSyncQueueRepository::new(&conn);
            let pending = queue.len()?;
            info!("event=cli_queue module=cli status=ok pending={pending}");
            println!("pending={pending}");
            println!(
                "last_sync_at={}",
                queue
                    .sync_state(LAST_SYNC_AT_KEY)?
                    .unwrap_or_else(|| "never".to_string())
            );
            for letter in queue.dead_letters()? {
                println!(
                    "dead seq={} kind={} code={} message={}",
                    letter.seq, letter.kind, letter.error_code, letter.error_message
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;

    #[test]
    fn parses_generate_arguments() {
        let cli = Cli::try_parse_from([
            "homeflow",
            "generate",
            "--db",
            "/tmp/family.sqlite3",
            "--family",
            "8d6f2b9e-4c1a-4f55-9d0e-0a1b2c3d4e5f",
            "--days",
            "14",
            "--today",
            "2026-03-01",
        ])
        .expect("arguments parse");

        match cli.command {
            Command::Generate { days, today, .. } => {
                assert_eq!(days, Some(14));
                assert_eq!(today.map(|date| date.to_string()).as_deref(), Some("2026-03-01"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_family_id() {
        assert!(Cli::try_parse_from([
            "homeflow", "generate", "--db", "x", "--family", "nope"
        ])
        .is_err());
    }
}
