//! # Hotpath Trace Model
//!
//! Data model of a recorded hot trace, as produced by the trace recorder and
//! consumed by `hotpath_compiler`.
//!
//! ## Overview
//!
//! - [`Trace`]: arena of [`TraceInstruction`]s, an instruction stream
//!   (prologue + loop body), and the entry/tail snapshots of the loop locals
//! - [`TraceBuilder`]: builder used by the recorder and tests
//! - [`Kind`], [`Value`], [`Comparator`]: primitive kinds and constants
//! - [`MethodRef`], [`CalleeKind`], [`Builtin`]: call targets and inline operations
//!
//! Traces are immutable once built and are `serde`-serializable, so they can
//! be stored and replayed through the compiler.

pub mod builder;
pub mod error;
pub mod kind;
pub mod method;
pub mod trace;

pub use builder::TraceBuilder;
pub use error::TraceError;
pub use kind::{Comparator, Kind, Value};
pub use method::{Builtin, CalleeKind, MethodRef};
pub use trace::{FrameState, LocalFlags, Trace, TraceInstruction, TraceValueId};
