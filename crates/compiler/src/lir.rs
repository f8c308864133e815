//! # Low-level Intermediate Representation (LIR)
//!
//! Block-structured IR produced by trace lowering and handed to the register
//! allocator. Values live in abstract, kind-tagged [`Slot`]s; the allocator
//! later maps slots to registers or stack locations.
//!
//! ## Layout
//!
//! - A [`LoweredMethod`] owns its blocks in final execution order.
//! - [`BlockId`]s are arena indices assigned at block creation; the block
//!   `serial` is assigned when the block is sealed and reflects emission
//!   order (the last block in execution order is sealed first).
//! - Branch targets always name blocks by [`BlockId`].

use crate::abi::CallingConvention;
use hotpath_trace::{Builtin, Comparator, Kind, MethodRef, Value};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Abstract value location with a primitive kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    kind: Kind,
    serial: u32,
}

impl Slot {
    pub(crate) fn new(kind: Kind, serial: u32) -> Self {
        Self { kind, serial }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Unique within one lowering
    pub fn serial(&self) -> u32 {
        self.serial
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.serial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Slot(Slot),
    Immediate(Value),
    /// Value the trace never tracked; any bit pattern is acceptable
    Undefined,
}

impl Operand {
    pub fn as_slot(&self) -> Option<Slot> {
        match self {
            Operand::Slot(slot) => Some(*slot),
            _ => None,
        }
    }
}

impl From<Slot> for Operand {
    fn from(slot: Slot) -> Self {
        Operand::Slot(slot)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Slot(slot) => write!(f, "{}", slot),
            Operand::Immediate(value) => write!(f, "{}", value),
            Operand::Undefined => f.write_str("undef"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Fixed runtime entry points, referenced by identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeEntry {
    /// Hands control back to the baseline tier; takes the failed guard's tag
    Bailout,
    /// Spills callee-saved registers before the bailout path makes calls
    SaveRegisters,
}

impl RuntimeEntry {
    pub fn name(self) -> &'static str {
        match self {
            RuntimeEntry::Bailout => "hotpath_bailout",
            RuntimeEntry::SaveRegisters => "hotpath_save_registers",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callee {
    Method(MethodRef),
    Runtime(RuntimeEntry),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Method(method) => write!(f, "{}", method.qualified_name()),
            Callee::Runtime(entry) => write!(f, "@{}", entry.name()),
        }
    }
}

/// Interpreter frame reconstruction data attached to calls and guard points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    pub method: MethodRef,
    pub bytecode_position: u32,
    pub locals: Vec<Operand>,
    pub stack: Vec<Operand>,
}

impl FrameDescriptor {
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.locals.iter().chain(self.stack.iter())
    }
}

impl fmt::Display for FrameDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} locals[", self.method.qualified_name(), self.bytecode_position)?;
        write_operands(f, &self.locals)?;
        f.write_str("] stack[")?;
        write_operands(f, &self.stack)?;
        f.write_str("]")
    }
}

fn write_operands(f: &mut fmt::Formatter<'_>, operands: &[Operand]) -> fmt::Result {
    for (i, operand) in operands.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", operand)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Assign {
        destination: Slot,
        source: Operand,
    },
    Builtin {
        result: Option<Slot>,
        op: Builtin,
        operands: Vec<Operand>,
    },
    Call {
        result: Option<Slot>,
        callee: Callee,
        convention: CallingConvention,
        arguments: Vec<Operand>,
        frame: Option<FrameDescriptor>,
    },
    /// Jumps to `targets[i]` when `tag <comparator> matches[i]`, otherwise to `default`
    Switch {
        kind: Kind,
        comparator: Comparator,
        tag: Operand,
        matches: Vec<Operand>,
        targets: Vec<BlockId>,
        default: BlockId,
    },
    /// Deoptimization point: state needed to resume in the interpreter
    Guardpoint {
        frame: Option<FrameDescriptor>,
    },
    /// Unconditional jump; `None` only while the loop header is unknown
    Goto {
        target: Option<BlockId>,
    },
    Return {
        value: Operand,
    },
}

impl Instruction {
    /// Slots read by this instruction, frame descriptors included
    pub fn reads(&self) -> Vec<Slot> {
        let mut operands: Vec<&Operand> = Vec::new();
        match self {
            Instruction::Assign { source, .. } => operands.push(source),
            Instruction::Builtin { operands: ops, .. } => operands.extend(ops.iter()),
            Instruction::Call { arguments, frame, .. } => {
                operands.extend(arguments.iter());
                if let Some(frame) = frame {
                    operands.extend(frame.operands());
                }
            }
            Instruction::Switch { tag, matches, .. } => {
                operands.push(tag);
                operands.extend(matches.iter());
            }
            Instruction::Guardpoint { frame: Some(frame) } => operands.extend(frame.operands()),
            Instruction::Guardpoint { frame: None } | Instruction::Goto { .. } => {}
            Instruction::Return { value } => operands.push(value),
        }
        operands.into_iter().filter_map(Operand::as_slot).collect()
    }

    pub fn writes(&self) -> Option<Slot> {
        match self {
            Instruction::Assign { destination, .. } => Some(*destination),
            Instruction::Builtin { result, .. } | Instruction::Call { result, .. } => *result,
            _ => None,
        }
    }

    pub fn branch_targets(&self) -> Vec<BlockId> {
        match self {
            Instruction::Switch { targets, default, .. } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            Instruction::Goto { target: Some(target) } => vec![*target],
            _ => Vec::new(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Switch { .. } | Instruction::Goto { .. } | Instruction::Return { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockRole {
    Normal,
    /// Compiler-generated block with no counterpart on the trace (bailout)
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    id: BlockId,
    role: BlockRole,
    serial: Option<u32>,
    pub(crate) instructions: VecDeque<Instruction>,
    pub(crate) predecessors: IndexSet<BlockId>,
    pub(crate) successors: IndexSet<BlockId>,
}

impl Block {
    pub(crate) fn new(id: BlockId, role: BlockRole) -> Self {
        Self {
            id,
            role,
            serial: None,
            instructions: VecDeque::new(),
            predecessors: IndexSet::new(),
            successors: IndexSet::new(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn role(&self) -> BlockRole {
        self.role
    }

    /// Emission serial; `None` until the block is sealed
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    pub(crate) fn set_serial(&mut self, serial: u32) -> bool {
        if self.serial.is_some() {
            return false;
        }
        self.serial = Some(serial);
        true
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.back().filter(|inst| inst.is_terminator())
    }

    pub fn predecessors(&self) -> &IndexSet<BlockId> {
        &self.predecessors
    }

    pub fn successors(&self) -> &IndexSet<BlockId> {
        &self.successors
    }
}

/// The result of lowering one trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoweredMethod {
    anchor: MethodRef,
    parameters: Vec<Slot>,
    blocks: IndexMap<BlockId, Block>,
    slot_count: u32,
    generated: bool,
}

impl LoweredMethod {
    pub(crate) fn new(anchor: MethodRef) -> Self {
        Self {
            anchor,
            parameters: Vec::new(),
            blocks: IndexMap::new(),
            slot_count: 0,
            generated: false,
        }
    }

    pub(crate) fn set_generated(&mut self, parameters: Vec<Slot>, blocks: IndexMap<BlockId, Block>, slot_count: u32) {
        self.parameters = parameters;
        self.blocks = blocks;
        self.slot_count = slot_count;
        self.generated = true;
    }

    pub fn anchor(&self) -> &MethodRef {
        &self.anchor
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// One slot per entry-state position (plus fillers), in interpreter order
    pub fn parameters(&self) -> &[Slot] {
        &self.parameters
    }

    /// Number of distinct slots minted while lowering
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Blocks in execution order
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.keys().copied()
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn label(&self, id: BlockId) -> String {
        match self.block(id).and_then(Block::serial) {
            Some(serial) => format!("B{}", serial),
            None => format!("?{}", id),
        }
    }

    fn write_instruction(&self, f: &mut fmt::Formatter<'_>, instruction: &Instruction) -> fmt::Result {
        match instruction {
            Instruction::Assign { destination, source } => write!(f, "{} := {}", destination, source),
            Instruction::Builtin { result, op, operands } => {
                if let Some(result) = result {
                    write!(f, "{} := ", result)?;
                }
                write!(f, "{}(", op)?;
                write_operands(f, operands)?;
                f.write_str(")")
            }
            Instruction::Call {
                result,
                callee,
                convention,
                arguments,
                frame,
            } => {
                if let Some(result) = result {
                    write!(f, "{} := ", result)?;
                }
                write!(f, "call[{:?}] {}(", convention, callee)?;
                write_operands(f, arguments)?;
                f.write_str(")")?;
                if let Some(frame) = frame {
                    write!(f, " frame {}", frame)?;
                }
                Ok(())
            }
            Instruction::Switch {
                kind,
                comparator,
                tag,
                matches,
                targets,
                default,
            } => {
                write!(f, "switch {}", kind)?;
                for (value, target) in matches.iter().zip(targets) {
                    write!(f, " [{} {} {} -> {}]", tag, comparator, value, self.label(*target))?;
                }
                write!(f, " else {}", self.label(*default))
            }
            Instruction::Guardpoint { frame: Some(frame) } => write!(f, "guardpoint {}", frame),
            Instruction::Guardpoint { frame: None } => f.write_str("guardpoint"),
            Instruction::Goto { target: Some(target) } => write!(f, "goto {}", self.label(*target)),
            Instruction::Goto { target: None } => f.write_str("goto <unresolved>"),
            Instruction::Return { value } => write!(f, "return {}", value),
        }
    }
}

impl fmt::Display for LoweredMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace {} (", self.anchor)?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        writeln!(f, ")")?;

        for block in self.blocks.values() {
            write!(f, "{}", self.label(block.id))?;
            if block.role == BlockRole::Synthetic {
                f.write_str(" synthetic")?;
            }
            let preds: Vec<String> = block.predecessors.iter().map(|id| self.label(*id)).collect();
            let succs: Vec<String> = block.successors.iter().map(|id| self.label(*id)).collect();
            writeln!(f, ":  preds[{}] succs[{}]", preds.join(", "), succs.join(", "))?;
            for instruction in &block.instructions {
                f.write_str("    ")?;
                self.write_instruction(f, instruction)?;
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
