//! Trace JSON loading and the built-in sample trace

use colored::Colorize;
use hotpath_trace::{Builtin, Comparator, Kind, MethodRef, Trace, TraceBuilder, TraceError, Value};
use std::fs;
use std::path::Path;

/// Load a trace from a JSON file and check it is well formed
pub fn load(input: &Path, verbose: bool) -> Result<Trace, Box<dyn std::error::Error>> {
    if verbose {
        println!("{} Reading {}", "info:".blue(), input.display());
    }

    let json_content =
        fs::read_to_string(input).map_err(|e| format!("Failed to read {}: {}", input.display(), e))?;
    let trace: Trace =
        serde_json::from_str(&json_content).map_err(|e| format!("Failed to parse {}: {}", input.display(), e))?;
    trace.validate()?;

    if verbose {
        println!(
            "{} Trace at {}@{}: {} values, {} entry locals",
            "info:".blue(),
            trace.anchor.qualified_name(),
            trace.anchor_position,
            trace.len(),
            trace.entry_state().len()
        );
    }
    Ok(trace)
}

/// `while (i + 1 < 100) i = i + 1;` recorded as a trace
pub fn sample() -> Result<Trace, TraceError> {
    let mut builder = TraceBuilder::new(MethodRef::new("Sample", "count", vec![Kind::Int], Kind::Void), 2);
    let i = builder.local(Kind::Int);
    let one = builder.constant(Value::Int(1));
    let next = builder.builtin(Builtin::IntAdd, &[i, one]);
    let limit = builder.constant(Value::Int(100));
    let state = builder.frame_state(7, &[]);
    builder.guard(Kind::Int, Comparator::LessThan, next, limit, Some(state));
    builder.store(i, next);
    builder.build()
}
