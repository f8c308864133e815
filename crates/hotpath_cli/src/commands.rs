//! Command execution logic

use colored::Colorize;
use hotpath_compiler::{lower_trace, LoweringConfig};
use petgraph::dot::Dot;
use std::fs;
use std::path::PathBuf;

use crate::trace_json;

/// Execute the lower command
pub fn lower(
    input: PathBuf,
    slot_reuse: bool,
    verify: bool,
    dot: bool,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let trace = trace_json::load(&input, verbose)?;

    let config = LoweringConfig {
        slot_reuse,
        verify,
        dump_cfg: verbose,
        ..LoweringConfig::default()
    };
    log::debug!("lowering with {:?}", config);

    let method = lower_trace(&trace, config)?;

    if verbose {
        println!(
            "{} {} blocks, {} slots",
            "info:".blue(),
            method.len(),
            method.slot_count()
        );
    }

    if dot {
        println!("{}", Dot::new(&method.to_graph()));
    } else {
        print!("{}", method);
    }
    Ok(())
}

/// Execute the sample command
pub fn sample(output: Option<PathBuf>, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let trace = trace_json::sample()?;
    let json = serde_json::to_string_pretty(&trace)?;

    match output {
        Some(path) => {
            fs::write(&path, json).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            if verbose {
                println!("{} Wrote sample trace to {}", "info:".blue(), path.display());
            }
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Display version information
pub fn version() -> Result<(), Box<dyn std::error::Error>> {
    println!("Hotpath Trace Compiler v{}", env!("CARGO_PKG_VERSION"));
    println!("Output: slot-based LIR (listing, Graphviz DOT)");
    Ok(())
}
