//! Guard compilation and the shared bailout path.
//!
//! A guard becomes a branch taken when the speculated condition does *not*
//! hold. The failing path stores the guard's site tag in the bailout guard
//! slot and jumps to the single bailout block of the trace, which saves
//! registers and hands the tag to the runtime.

use crate::abi::AbiSelector;
use crate::lir::{BlockId, Callee, FrameDescriptor, Instruction, Operand, RuntimeEntry, Slot};
use hotpath_trace::{Comparator, Kind, TraceValueId, Value};

/// A lowered guard, ready to be turned into its exit sequence
#[derive(Debug, Clone, PartialEq)]
pub struct GuardExit {
    /// Identifies the guard to the bailout handler
    pub site: TraceValueId,
    pub kind: Kind,
    /// The condition that must hold to stay on the trace
    pub comparator: Comparator,
    pub tag: Operand,
    pub other: Operand,
    pub frame: Option<FrameDescriptor>,
}

impl GuardExit {
    pub fn site_tag(&self) -> Value {
        Value::GuardSite(self.site.0)
    }

    /// Instructions opening the guard's block, in execution order
    pub fn into_instructions(self, bailout_slot: Slot, bailout: BlockId, continuation: BlockId) -> Vec<Instruction> {
        log::trace!(
            "[GUARD] {}: leave when {} {} {}",
            self.site,
            self.tag,
            self.comparator.complement(),
            self.other
        );
        vec![
            Instruction::Assign {
                destination: bailout_slot,
                source: Operand::Immediate(self.site_tag()),
            },
            Instruction::Guardpoint { frame: self.frame },
            Instruction::Switch {
                kind: self.kind,
                comparator: self.comparator.complement(),
                tag: self.tag,
                matches: vec![self.other],
                targets: vec![bailout],
                default: continuation,
            },
        ]
    }
}

/// Contents of the bailout block, in execution order
pub fn bailout_sequence(bailout_slot: Slot, abi: &dyn AbiSelector) -> Vec<Instruction> {
    let runtime_call = |entry: RuntimeEntry, arguments: Vec<Operand>| Instruction::Call {
        result: None,
        callee: Callee::Runtime(entry),
        convention: abi.runtime_convention(entry),
        arguments,
        frame: None,
    };

    vec![
        runtime_call(RuntimeEntry::SaveRegisters, Vec::new()),
        runtime_call(RuntimeEntry::Bailout, vec![Operand::Slot(bailout_slot)]),
        Instruction::Return {
            value: Operand::Slot(bailout_slot),
        },
    ]
}
