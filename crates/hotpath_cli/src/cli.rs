//! CLI argument parsing and command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hotpath")]
#[command(about = "Hotpath trace compiler - Lower recorded hot traces to a slot-based CFG", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Lower a trace stored as JSON and print the result
    Lower {
        /// Trace file (.json)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Give every value its own slot
        #[arg(long)]
        no_slot_reuse: bool,

        /// Skip verification of the lowered CFG
        #[arg(long)]
        no_verify: bool,

        /// Print the CFG as Graphviz DOT instead of a listing
        #[arg(long)]
        dot: bool,
    },

    /// Write a sample trace (a guarded counting loop) as JSON
    Sample {
        /// Output file path; prints to stdout when omitted
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_flags() {
        let cli = Cli::parse_from(["hotpath", "lower", "loop.json", "--no-slot-reuse", "--dot"]);
        match cli.command {
            Commands::Lower {
                input,
                no_slot_reuse,
                no_verify,
                dot,
            } => {
                assert_eq!(input, PathBuf::from("loop.json"));
                assert!(no_slot_reuse);
                assert!(!no_verify);
                assert!(dot);
            }
            _ => panic!("expected the lower command"),
        }
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::parse_from(["hotpath", "sample", "-v"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Sample { output: None }));
    }
}
