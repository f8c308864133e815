//! # Hotpath Trace Compiler
//!
//! Backend of the trace tier: lowers a recorded hot trace into a
//! block-structured, slot-based IR ready for register allocation and native
//! code emission.
//!
//! ## Architecture
//!
//! The pass walks the trace once, from its last instruction to its first:
//! - **Slot allocation** ([`slots`]): slots are allocated at a value's last use
//!   and recycled at its definition
//! - **Instruction lowering** ([`lowering`]): constants, builtins and calls
//! - **CFG construction** ([`cfg`]): blocks are opened per region and sealed
//!   when the walk moves past them
//! - **Loop write-back** ([`writeback`]): ordered moves that carry loop
//!   variables into the next iteration
//! - **Guards** ([`guard`]): conditional exits to a shared bailout block
//!
//! A [`TraceLowering`] context translates exactly one trace and is then
//! consumed; contexts share nothing, so independent traces can be lowered on
//! separate threads.

pub mod abi;
pub mod cfg;
pub mod guard;
pub mod lir;
pub mod lowering;
pub mod slots;
pub mod writeback;

pub use abi::{AbiSelector, CallingConvention, StandardAbiSelector};
pub use cfg::{verify, CfgEdge};
pub use lir::{
    Block, BlockId, BlockRole, Callee, FrameDescriptor, Instruction, LoweredMethod, Operand, RuntimeEntry, Slot,
};
pub use lowering::{lower_trace, LoweringConfig, LoweringPhase, TraceLowering};
pub use slots::{AllocationMode, SlotAllocator};
pub use writeback::{schedule_moves, Move, WriteRecord};

use hotpath_trace::TraceError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompilerError {
    /// A bug in the lowering pass itself; the trace is abandoned
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Not yet supported: {0}")]
    Unsupported(String),

    #[error("Invalid trace: {0}")]
    InvalidTrace(#[from] TraceError),
}

impl CompilerError {
    pub fn invariant(message: impl Into<String>) -> Self {
        CompilerError::InvariantViolation(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        CompilerError::Unsupported(message.into())
    }
}

pub type CompilerResult<T> = Result<T, CompilerError>;
