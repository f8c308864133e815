//! # Recorded Traces
//!
//! A trace is the linear, loop-centric record of one hot path. All values the
//! trace mentions live in one arena and are identified by [`TraceValueId`];
//! identity of a value is identity of its id. The instruction stream
//! (`prologue` then `body`) lists, in execution order, the ids the compiler
//! has to visit. Leaves (constants, locals, placeholders) may be referenced
//! without appearing in the stream.

use crate::error::TraceError;
use crate::kind::{Comparator, Kind, Value};
use crate::method::{Builtin, MethodRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Identity of a value recorded on a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceValueId(pub u32);

impl TraceValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TraceValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Access flags of an entry-state local
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFlags {
    /// The local's entry value is read somewhere on the trace
    pub read: bool,
    /// The local holds a different value when the trace loops back
    pub written: bool,
}

/// Interpreter-level state at a call or guard: the values of all locals and
/// operand-stack slots plus the bytecode location to resume at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameState {
    pub method: MethodRef,
    pub bytecode_position: u32,
    pub locals: Vec<TraceValueId>,
    pub stack: Vec<TraceValueId>,
}

impl FrameState {
    pub fn values(&self) -> impl Iterator<Item = TraceValueId> + '_ {
        self.locals.iter().chain(self.stack.iter()).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceInstruction {
    Constant(Value),
    /// Value of an interpreter local on loop entry
    Local { slot: u16, kind: Kind, flags: LocalFlags },
    /// A value the recorder did not track (dead or ignored)
    Placeholder,
    Builtin { op: Builtin, operands: Vec<TraceValueId> },
    Call {
        method: MethodRef,
        operands: Vec<TraceValueId>,
        state: Option<FrameState>,
    },
    /// Speculative check: `operands[0] <comparator> operands[1]` must hold,
    /// otherwise execution falls back to the baseline tier.
    Guard {
        kind: Kind,
        comparator: Comparator,
        operands: [TraceValueId; 2],
        state: Option<FrameState>,
    },
    /// Request to splice an already-lowered method body into the trace
    InlinedCall { method: MethodRef, operands: Vec<TraceValueId> },
}

impl TraceInstruction {
    /// Kind of the value this instruction produces
    pub fn kind(&self) -> Kind {
        match self {
            TraceInstruction::Constant(value) => value.kind(),
            TraceInstruction::Local { kind, .. } => *kind,
            TraceInstruction::Placeholder => Kind::Void,
            TraceInstruction::Builtin { op, .. } => op.result_kind(),
            TraceInstruction::Call { method, .. } => method.result,
            TraceInstruction::Guard { .. } => Kind::Void,
            TraceInstruction::InlinedCall { method, .. } => method.result,
        }
    }

    /// Constants, locals and placeholders are defined outside the instruction stream.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            TraceInstruction::Constant(_) | TraceInstruction::Local { .. } | TraceInstruction::Placeholder
        )
    }

    pub fn operands(&self) -> &[TraceValueId] {
        match self {
            TraceInstruction::Builtin { operands, .. }
            | TraceInstruction::Call { operands, .. }
            | TraceInstruction::InlinedCall { operands, .. } => operands.as_slice(),
            TraceInstruction::Guard { operands, .. } => &operands[..],
            _ => &[],
        }
    }

    pub fn state(&self) -> Option<&FrameState> {
        match self {
            TraceInstruction::Call { state, .. } | TraceInstruction::Guard { state, .. } => state.as_ref(),
            _ => None,
        }
    }

    /// Kinds the operands must have; `None` for instructions without operands
    pub fn operand_kinds(&self) -> Option<Vec<Kind>> {
        match self {
            TraceInstruction::Builtin { op, .. } => Some(op.operand_kinds().to_vec()),
            TraceInstruction::Call { method, .. } | TraceInstruction::InlinedCall { method, .. } => {
                Some(method.params.clone())
            }
            TraceInstruction::Guard { kind, .. } => Some(vec![*kind, *kind]),
            _ => None,
        }
    }

    /// Every value this instruction reads, including its frame state
    pub fn uses(&self) -> Vec<TraceValueId> {
        let mut uses = self.operands().to_vec();
        if let Some(state) = self.state() {
            uses.extend(state.values());
        }
        uses
    }
}

/// A recorded hot trace. Read-only to the compiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Method containing the recorded loop
    pub anchor: MethodRef,
    /// Bytecode position of the loop header
    pub anchor_position: u32,
    pub(crate) values: Vec<TraceInstruction>,
    pub(crate) prologue: Vec<TraceValueId>,
    pub(crate) body: Vec<TraceValueId>,
    pub(crate) entry_state: Vec<TraceValueId>,
    pub(crate) tail_state: Vec<TraceValueId>,
}

impl Trace {
    pub fn get(&self, id: TraceValueId) -> Option<&TraceInstruction> {
        self.values.get(id.index())
    }

    pub fn instruction(&self, id: TraceValueId) -> Result<&TraceInstruction, TraceError> {
        self.get(id).ok_or(TraceError::DanglingValue(id))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Instructions executed once before the loop is entered
    pub fn prologue(&self) -> &[TraceValueId] {
        &self.prologue
    }

    /// Instructions of one loop iteration, in execution order
    pub fn body(&self) -> &[TraceValueId] {
        &self.body
    }

    /// Live locals on loop entry; every element is a [`TraceInstruction::Local`]
    pub fn entry_state(&self) -> &[TraceValueId] {
        &self.entry_state
    }

    /// Values the entry locals hold when control loops back
    pub fn tail_state(&self) -> &[TraceValueId] {
        &self.tail_state
    }

    pub fn local_flags(&self, id: TraceValueId) -> Option<LocalFlags> {
        match self.get(id)? {
            TraceInstruction::Local { flags, .. } => Some(*flags),
            _ => None,
        }
    }

    /// Values whose content is the same on every iteration: locals the loop
    /// never rewrites and everything defined by the prologue.
    pub fn invariant_values(&self) -> HashSet<TraceValueId> {
        let mut invariants: HashSet<TraceValueId> = self
            .entry_state
            .iter()
            .zip(&self.tail_state)
            .filter(|(entry, tail)| entry == tail)
            .map(|(entry, _)| *entry)
            .collect();
        invariants.extend(self.prologue.iter().copied());
        invariants
    }

    /// Check the structural rules the compiler relies on.
    pub fn validate(&self) -> Result<(), TraceError> {
        if self.entry_state.len() != self.tail_state.len() {
            return Err(TraceError::StateLengthMismatch {
                entry: self.entry_state.len(),
                tail: self.tail_state.len(),
            });
        }

        for (position, &id) in self.entry_state.iter().enumerate() {
            match self.instruction(id)? {
                TraceInstruction::Local { .. } => {}
                _ => return Err(TraceError::NotALocal { position, value: id }),
            }
        }

        let mut defined: HashSet<TraceValueId> = HashSet::new();
        for &id in self.prologue.iter().chain(&self.body) {
            let instruction = self.instruction(id)?;

            for value in instruction.uses() {
                let used = self.instruction(value)?;
                if used.kind() == Kind::Void && !matches!(used, TraceInstruction::Placeholder) {
                    return Err(TraceError::UseOfVoid { user: id, value });
                }
                if !used.is_leaf() && !defined.contains(&value) {
                    return Err(TraceError::UseBeforeDefinition { user: id, value });
                }
            }

            match instruction {
                TraceInstruction::Builtin { op, operands } if operands.len() != op.arity() => {
                    return Err(TraceError::ArityMismatch {
                        value: id,
                        op: op.name().to_string(),
                        expected: op.arity(),
                        found: operands.len(),
                    });
                }
                TraceInstruction::Call { method, operands, .. }
                | TraceInstruction::InlinedCall { method, operands }
                    if operands.len() != method.params.len() =>
                {
                    return Err(TraceError::ArityMismatch {
                        value: id,
                        op: method.qualified_name(),
                        expected: method.params.len(),
                        found: operands.len(),
                    });
                }
                TraceInstruction::Guard { kind: Kind::Void, .. } => {
                    return Err(TraceError::VoidGuard(id));
                }
                _ => {}
            }
            self.check_operand_kinds(id, instruction)?;

            if !defined.insert(id) {
                return Err(TraceError::DuplicateInstruction(id));
            }
        }

        for (position, &value) in self.tail_state.iter().enumerate() {
            if !self.instruction(value)?.is_leaf() && !defined.contains(&value) {
                return Err(TraceError::UndefinedTailValue { position, value });
            }
        }

        Ok(())
    }

    /// Untracked operands stand for any kind.
    fn check_operand_kinds(&self, user: TraceValueId, instruction: &TraceInstruction) -> Result<(), TraceError> {
        let kinds = match instruction.operand_kinds() {
            Some(kinds) => kinds,
            None => return Ok(()),
        };
        for (position, (&operand, &expected)) in instruction.operands().iter().zip(&kinds).enumerate() {
            let used = self.instruction(operand)?;
            if matches!(used, TraceInstruction::Placeholder) {
                continue;
            }
            let found = used.kind();
            if found != expected {
                return Err(TraceError::OperandKind {
                    user,
                    position,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> MethodRef {
        MethodRef::new("Loop", "run", vec![], Kind::Void)
    }

    #[test]
    fn test_validate_rejects_use_before_definition() {
        let trace = Trace {
            anchor: anchor(),
            anchor_position: 0,
            values: vec![
                TraceInstruction::Constant(Value::Int(1)),
                TraceInstruction::Builtin {
                    op: Builtin::IntAdd,
                    operands: vec![TraceValueId(0), TraceValueId(2)],
                },
                TraceInstruction::Builtin {
                    op: Builtin::IntNeg,
                    operands: vec![TraceValueId(0)],
                },
            ],
            prologue: vec![],
            body: vec![TraceValueId(1), TraceValueId(2)],
            entry_state: vec![],
            tail_state: vec![],
        };

        assert_eq!(
            trace.validate(),
            Err(TraceError::UseBeforeDefinition {
                user: TraceValueId(1),
                value: TraceValueId(2)
            })
        );
    }

    #[test]
    fn test_validate_rejects_state_mismatch() {
        let trace = Trace {
            anchor: anchor(),
            anchor_position: 0,
            values: vec![TraceInstruction::Local {
                slot: 0,
                kind: Kind::Int,
                flags: LocalFlags::default(),
            }],
            prologue: vec![],
            body: vec![],
            entry_state: vec![TraceValueId(0)],
            tail_state: vec![],
        };

        assert_eq!(
            trace.validate(),
            Err(TraceError::StateLengthMismatch { entry: 1, tail: 0 })
        );
    }

    #[test]
    fn test_validate_rejects_non_local_entry() {
        let trace = Trace {
            anchor: anchor(),
            anchor_position: 0,
            values: vec![TraceInstruction::Constant(Value::Int(0))],
            prologue: vec![],
            body: vec![],
            entry_state: vec![TraceValueId(0)],
            tail_state: vec![TraceValueId(0)],
        };

        assert_eq!(
            trace.validate(),
            Err(TraceError::NotALocal {
                position: 0,
                value: TraceValueId(0)
            })
        );
    }
}
