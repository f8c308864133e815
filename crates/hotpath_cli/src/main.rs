//! Hotpath CLI - Command-line driver for the trace compiler
//!
//! Loads recorded traces stored as JSON, lowers them and prints the resulting
//! CFG as a listing or as Graphviz DOT.

mod cli;
mod commands;
mod trace_json;

use clap::Parser;
use colored::Colorize;
use std::process;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let result = match cli.command {
        Commands::Lower {
            input,
            no_slot_reuse,
            no_verify,
            dot,
        } => commands::lower(input, !no_slot_reuse, !no_verify, dot, cli.verbose),
        Commands::Sample { output } => commands::sample(output, cli.verbose),
        Commands::Version => commands::version(),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        process::exit(1);
    }
}
