pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "takeoff",
    about = "Takeoff estimation CLI",
    long_about = "Run database migrations, seed the master rule catalog, estimate a bill of \
quantities from a free-text building description, and export persisted BOQs.",
    after_help = "Examples:\n  takeoff migrate\n  takeoff seed\n  takeoff estimate --user u1 --text \"a 4m by 5m hall, tile flooring\"\n  takeoff export BOQ-<id>\n  takeoff doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Seed the master rule catalog (idempotent; safe to re-run)")]
    Seed,
    #[command(about = "Run the full estimation pipeline over a building description")]
    Estimate {
        #[arg(long, help = "Identifier of the requesting user")]
        user: String,
        #[arg(long, help = "Optional project identifier")]
        project: Option<String>,
        #[arg(long, help = "Free-text building description")]
        text: String,
        #[arg(long, help = "Attempt this request corrects, for retry lineage")]
        parent_attempt: Option<String>,
    },
    #[command(about = "Export a persisted BOQ as CSV on stdout")]
    Export {
        #[arg(help = "Identifier of the BOQ to export")]
        boq_id: String,
    },
    #[command(about = "Validate config, provider credentials, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Estimate { user, project, text, parent_attempt } => {
            commands::estimate::run(user, project, text, parent_attempt)
        }
        Command::Export { boq_id } => commands::export::run(boq_id),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
