//! # Trace Builder API
//!
//! Programmatic construction of traces, used by the recorder, tests and the
//! CLI sample. The builder tracks the current value of every entry local so
//! frame states and the tail state fall out of the recorded stores, and it
//! computes the `read`/`written` flags of each local when the trace is built.
//!
//! ```
//! use hotpath_trace::{Builtin, Comparator, Kind, MethodRef, TraceBuilder, Value};
//!
//! let mut builder = TraceBuilder::new(MethodRef::new("Counter", "run", vec![], Kind::Void), 4);
//! let i = builder.local(Kind::Int);
//! let one = builder.constant(Value::Int(1));
//! let next = builder.builtin(Builtin::IntAdd, &[i, one]);
//! let limit = builder.constant(Value::Int(100));
//! let state = builder.frame_state(9, &[]);
//! builder.guard(Kind::Int, Comparator::LessThan, next, limit, Some(state));
//! builder.store(i, next);
//! let trace = builder.build().unwrap();
//! assert_eq!(trace.tail_state(), &[next]);
//! ```

use crate::error::TraceError;
use crate::kind::{Comparator, Kind, Value};
use crate::method::{Builtin, MethodRef};
use crate::trace::{FrameState, LocalFlags, Trace, TraceInstruction, TraceValueId};
use std::collections::HashSet;

pub struct TraceBuilder {
    anchor: MethodRef,
    anchor_position: u32,
    values: Vec<TraceInstruction>,
    prologue: Vec<TraceValueId>,
    body: Vec<TraceValueId>,
    entry_state: Vec<TraceValueId>,
    /// Current value of each entry local, becomes the tail state
    current: Vec<TraceValueId>,
    next_local_slot: u16,
    in_prologue: bool,
}

impl TraceBuilder {
    pub fn new(anchor: MethodRef, anchor_position: u32) -> Self {
        Self {
            anchor,
            anchor_position,
            values: Vec::new(),
            prologue: Vec::new(),
            body: Vec::new(),
            entry_state: Vec::new(),
            current: Vec::new(),
            next_local_slot: 0,
            in_prologue: false,
        }
    }

    fn push(&mut self, instruction: TraceInstruction) -> TraceValueId {
        let id = TraceValueId(self.values.len() as u32);
        self.values.push(instruction);
        id
    }

    fn record(&mut self, instruction: TraceInstruction) -> TraceValueId {
        let id = self.push(instruction);
        if self.in_prologue {
            self.prologue.push(id);
        } else {
            self.body.push(id);
        }
        id
    }

    /// Declare the next interpreter local live on loop entry.
    pub fn local(&mut self, kind: Kind) -> TraceValueId {
        let slot = self.next_local_slot;
        self.next_local_slot += if kind.is_category2() { 2 } else { 1 };
        let id = self.push(TraceInstruction::Local {
            slot,
            kind,
            flags: LocalFlags::default(),
        });
        self.entry_state.push(id);
        self.current.push(id);
        id
    }

    pub fn constant(&mut self, value: Value) -> TraceValueId {
        self.push(TraceInstruction::Constant(value))
    }

    pub fn placeholder(&mut self) -> TraceValueId {
        self.push(TraceInstruction::Placeholder)
    }

    /// Record everything `f` emits into the prologue instead of the loop body.
    pub fn prologue<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let outer = std::mem::replace(&mut self.in_prologue, true);
        let result = f(self);
        self.in_prologue = outer;
        result
    }

    pub fn builtin(&mut self, op: Builtin, operands: &[TraceValueId]) -> TraceValueId {
        self.record(TraceInstruction::Builtin {
            op,
            operands: operands.to_vec(),
        })
    }

    pub fn call(&mut self, method: MethodRef, operands: &[TraceValueId], state: Option<FrameState>) -> TraceValueId {
        self.record(TraceInstruction::Call {
            method,
            operands: operands.to_vec(),
            state,
        })
    }

    pub fn guard(
        &mut self,
        kind: Kind,
        comparator: Comparator,
        lhs: TraceValueId,
        rhs: TraceValueId,
        state: Option<FrameState>,
    ) -> TraceValueId {
        self.record(TraceInstruction::Guard {
            kind,
            comparator,
            operands: [lhs, rhs],
            state,
        })
    }

    pub fn inlined_call(&mut self, method: MethodRef, operands: &[TraceValueId]) -> TraceValueId {
        self.record(TraceInstruction::InlinedCall {
            method,
            operands: operands.to_vec(),
        })
    }

    /// Store `value` into the entry local `local`; the last store becomes the
    /// local's tail value. Storing into something that is not an entry local
    /// is ignored.
    pub fn store(&mut self, local: TraceValueId, value: TraceValueId) {
        if let Some(position) = self.entry_state.iter().position(|&entry| entry == local) {
            self.current[position] = value;
        }
    }

    /// Current value held by an entry local
    pub fn current(&self, local: TraceValueId) -> Option<TraceValueId> {
        let position = self.entry_state.iter().position(|&entry| entry == local)?;
        Some(self.current[position])
    }

    /// Snapshot the current local values plus `stack` at `bytecode_position`
    /// of the anchor method.
    pub fn frame_state(&self, bytecode_position: u32, stack: &[TraceValueId]) -> FrameState {
        FrameState {
            method: self.anchor.clone(),
            bytecode_position,
            locals: self.current.clone(),
            stack: stack.to_vec(),
        }
    }

    pub fn build(mut self) -> Result<Trace, TraceError> {
        let mut read: HashSet<TraceValueId> = HashSet::new();
        for &id in self.prologue.iter().chain(&self.body) {
            let instruction = self
                .values
                .get(id.index())
                .ok_or(TraceError::DanglingValue(id))?;
            read.extend(instruction.uses());
        }
        // A local copied into another local's tail position is read as well.
        for (position, &tail) in self.current.iter().enumerate() {
            if self.entry_state[position] != tail {
                read.insert(tail);
            }
        }

        for (position, &entry) in self.entry_state.iter().enumerate() {
            if let Some(TraceInstruction::Local { flags, .. }) = self.values.get_mut(entry.index()) {
                *flags = LocalFlags {
                    read: read.contains(&entry),
                    written: self.current[position] != entry,
                };
            }
        }

        let trace = Trace {
            anchor: self.anchor,
            anchor_position: self.anchor_position,
            values: self.values,
            prologue: self.prologue,
            body: self.body,
            entry_state: self.entry_state,
            tail_state: self.current,
        };
        trace.validate()?;
        Ok(trace)
    }
}
