//! Hamlet CLI - run scenarios, check rulesets and print cost tables.

// Allow print in the CLI binary
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Hamlet - village progression and event scheduling
#[derive(Parser, Debug)]
#[command(name = "hamlet")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log admissions, completions and arrivals
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a scenario file and print its event log
    Run {
        /// Scenario file (JSON)
        #[arg(required = true)]
        scenario: std::path::PathBuf,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: cli::OutputFormat,

        /// Save the full recording to file
        #[arg(long)]
        save: Option<std::path::PathBuf>,

        /// Save the final world snapshot to file
        #[arg(long)]
        snapshot: Option<std::path::PathBuf>,

        /// Only print the summary
        #[arg(short, long)]
        quiet: bool,
    },

    /// Validate a ruleset file
    Validate {
        /// Ruleset file (JSON)
        #[arg(required = true)]
        ruleset: std::path::PathBuf,
    },

    /// Print the cost and duration of every level of a building or unit
    Quote {
        /// Building or unit name
        #[arg(required = true)]
        kind: String,

        /// Ruleset file (default: built-in rules)
        #[arg(short, long)]
        ruleset: Option<std::path::PathBuf>,

        /// Main building level used for the construction speed bonus
        #[arg(short, long, default_value = "0")]
        main_building: u32,

        /// Highest level to print (default: the building's maximum)
        #[arg(short, long)]
        levels: Option<u32>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match args.command {
        Commands::Run {
            scenario,
            format,
            save,
            snapshot,
            quiet,
        } => cli::run::execute(&scenario, format, save.as_deref(), snapshot.as_deref(), quiet),

        Commands::Validate { ruleset } => cli::validate::execute(&ruleset),

        Commands::Quote {
            kind,
            ruleset,
            main_building,
            levels,
        } => cli::quote::execute(&kind, ruleset.as_deref(), main_building, levels),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
