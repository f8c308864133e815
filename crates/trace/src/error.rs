//! # Trace Error Types
//!
//! Errors raised when a recorded trace is structurally malformed.

use crate::kind::Kind;
use crate::trace::TraceValueId;
use thiserror::Error;

/// A trace that cannot be handed to the compiler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("value {0} does not exist in the trace")]
    DanglingValue(TraceValueId),

    #[error("entry state has {entry} positions but tail state has {tail}")]
    StateLengthMismatch { entry: usize, tail: usize },

    #[error("entry state position {position} holds {value}, which is not a local")]
    NotALocal { position: usize, value: TraceValueId },

    #[error("instruction {0} is recorded more than once")]
    DuplicateInstruction(TraceValueId),

    #[error("{user} uses {value} before it is defined")]
    UseBeforeDefinition { user: TraceValueId, value: TraceValueId },

    #[error("{user} uses {value}, which produces no value")]
    UseOfVoid { user: TraceValueId, value: TraceValueId },

    #[error("{value}: {op} expects {expected} operands, found {found}")]
    ArityMismatch {
        value: TraceValueId,
        op: String,
        expected: usize,
        found: usize,
    },

    #[error("{user} expects a {expected} operand at position {position}, found {found}")]
    OperandKind {
        user: TraceValueId,
        position: usize,
        expected: Kind,
        found: Kind,
    },

    #[error("{0}: guards compare values, they cannot test a void operand")]
    VoidGuard(TraceValueId),

    #[error("tail state position {position} holds {value}, which is never defined on the trace")]
    UndefinedTailValue { position: usize, value: TraceValueId },
}
