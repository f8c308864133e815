//! # Trace Lowering
//!
//! Translates a [`Trace`] into a [`LoweredMethod`] in a single backward walk.
//!
//! Walking from the last instruction to the first means the last use of every
//! value is seen before its definition: a slot is bound lazily at the first
//! (backward) use and recycled as soon as the defining instruction has been
//! emitted. Instructions are prepended to the current block, so blocks come
//! out in execution order.
//!
//! The walk goes through these phases:
//!
//! 1. **Start**: create the shared bailout block and the parameter slots
//! 2. **TraceBody**: open the trace-start block (write-back moves plus the
//!    pending loop-back goto), then lower the loop body backwards, opening a
//!    new block at every guard
//! 3. **LoopBack**: point the pending goto at the loop header, the block the
//!    walk ended in
//! 4. **Prologue**: lower prologue instructions into a block in front of the
//!    header, dropped if it stays empty
//! 5. **Finalized**: publish the block sequence and verify it

use crate::abi::{AbiSelector, StandardAbiSelector};
use crate::cfg::{verify, CfgBuilder};
use crate::guard::{bailout_sequence, GuardExit};
use crate::lir::{BlockId, BlockRole, Callee, FrameDescriptor, Instruction, LoweredMethod, Operand, Slot};
use crate::slots::{AllocationMode, SlotAllocator};
use crate::writeback::{collect_writes, schedule_moves, Move};
use crate::{CompilerError, CompilerResult};
use hotpath_trace::{Comparator, FrameState, Kind, Trace, TraceInstruction, TraceValueId};
use std::collections::HashSet;
use std::sync::Arc;

/// Configuration for trace lowering
#[derive(Clone)]
pub struct LoweringConfig {
    /// Recycle slots of dead values; when off every value gets its own slot
    pub slot_reuse: bool,
    /// Run the output verifier on the finished method
    pub verify: bool,
    /// Log the finished CFG at debug level
    pub dump_cfg: bool,
    /// Calling-convention selection for emitted calls
    pub abi: Arc<dyn AbiSelector>,
}

impl std::fmt::Debug for LoweringConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoweringConfig")
            .field("slot_reuse", &self.slot_reuse)
            .field("verify", &self.verify)
            .field("dump_cfg", &self.dump_cfg)
            .field("abi", &self.abi.name())
            .finish()
    }
}

impl Default for LoweringConfig {
    fn default() -> Self {
        Self {
            slot_reuse: true,
            verify: true,
            dump_cfg: false,
            abi: Arc::new(StandardAbiSelector),
        }
    }
}

impl LoweringConfig {
    /// One slot per value and a CFG dump; easiest output to read when
    /// debugging the register allocator
    pub fn debug() -> Self {
        Self {
            slot_reuse: false,
            verify: true,
            dump_cfg: true,
            ..Self::default()
        }
    }

    /// Skip verification for lowest compile latency
    pub fn production() -> Self {
        Self {
            verify: false,
            ..Self::default()
        }
    }

    pub fn with_abi(mut self, abi: Arc<dyn AbiSelector>) -> Self {
        self.abi = abi;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoweringPhase {
    Start,
    TraceBody,
    LoopBack,
    Prologue,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Prologue,
    Body,
}

/// Lowering context for exactly one trace
#[derive(Debug)]
pub struct TraceLowering {
    config: LoweringConfig,
    phase: LoweringPhase,
    slots: SlotAllocator,
    cfg: CfgBuilder,
    /// Receives the guard-site tag before a jump to the bailout block
    bailout_slot: Slot,
    bailout: Option<BlockId>,
    /// Block instructions are prepended to
    insertion: Option<BlockId>,
    /// Blocks ending in a goto that waits for the loop header
    loop_patches: Vec<BlockId>,
    invariants: HashSet<TraceValueId>,
    parameters: Vec<Slot>,
    method: Option<LoweredMethod>,
}

impl TraceLowering {
    pub fn new(config: LoweringConfig) -> Self {
        let mut slots = SlotAllocator::new(config.slot_reuse);
        let bailout_slot = slots.allocate(Kind::Reference, AllocationMode::NoReuse);
        Self {
            config,
            phase: LoweringPhase::Start,
            slots,
            cfg: CfgBuilder::new(),
            bailout_slot,
            bailout: None,
            insertion: None,
            loop_patches: Vec::new(),
            invariants: HashSet::new(),
            parameters: Vec::new(),
            method: None,
        }
    }

    pub fn phase(&self) -> LoweringPhase {
        self.phase
    }

    pub fn config(&self) -> &LoweringConfig {
        &self.config
    }

    /// Lower `trace`. A context accepts a single trace; once the walk has
    /// started it cannot be restarted, even after an error.
    pub fn lower(&mut self, trace: &Trace) -> CompilerResult<()> {
        if self.phase != LoweringPhase::Start {
            return Err(CompilerError::invariant(format!(
                "lowering context is in phase {:?}; a context lowers one trace",
                self.phase
            )));
        }
        trace.validate()?;

        log::debug!(
            "[TRACE-LOWER] lowering trace at {}@{} ({} body, {} prologue instructions)",
            trace.anchor.qualified_name(),
            trace.anchor_position,
            trace.body().len(),
            trace.prologue().len()
        );

        self.phase = LoweringPhase::TraceBody;
        self.invariants = trace.invariant_values();
        self.begin_tree()?;
        self.parameters = self.build_parameters(trace)?;
        self.begin_trace(trace)?;
        for &id in trace.body().iter().rev() {
            self.lower_instruction(trace, id, Region::Body)?;
        }

        self.phase = LoweringPhase::LoopBack;
        self.patch_loops()?;

        self.phase = LoweringPhase::Prologue;
        self.lower_prologue(trace)?;

        self.finalize(trace)
    }

    /// The generated method; only available once lowering has finished.
    pub fn method(&self) -> CompilerResult<&LoweredMethod> {
        match (self.phase, &self.method) {
            (LoweringPhase::Finalized, Some(method)) => Ok(method),
            _ => Err(not_finalized(self.phase)),
        }
    }

    pub fn finish(self) -> CompilerResult<LoweredMethod> {
        match (self.phase, self.method) {
            (LoweringPhase::Finalized, Some(method)) => Ok(method),
            (phase, _) => Err(not_finalized(phase)),
        }
    }

    fn begin_tree(&mut self) -> CompilerResult<()> {
        let bailout = self.cfg.create_block(BlockRole::Synthetic);
        self.cfg.emit_block(bailout, false)?;
        self.cfg
            .prepend_to(bailout, bailout_sequence(self.bailout_slot, self.config.abi.as_ref()))?;
        self.bailout = Some(bailout);
        Ok(())
    }

    /// One slot per entry local in interpreter layout: read locals get their
    /// bound slot, unread ones a void filler, and long/double locals an extra
    /// filler for their second half.
    fn build_parameters(&mut self, trace: &Trace) -> CompilerResult<Vec<Slot>> {
        let mut parameters = Vec::with_capacity(trace.entry_state().len());
        for &local in trace.entry_state() {
            let (kind, flags) = match trace.instruction(local)? {
                TraceInstruction::Local { kind, flags, .. } => (*kind, *flags),
                other => {
                    return Err(CompilerError::invariant(format!(
                        "entry state holds {} ({:?}) instead of a local",
                        local, other
                    )))
                }
            };

            let slot = if flags.read {
                self.use_value(trace, local)?
                    .as_slot()
                    .ok_or_else(|| CompilerError::invariant(format!("local {} has no slot", local)))?
            } else {
                self.slots.allocate(Kind::Void, AllocationMode::NoReuse)
            };
            parameters.push(slot);
            if kind.is_category2() {
                parameters.push(self.slots.allocate(Kind::Void, AllocationMode::NoReuse));
            }
        }
        Ok(parameters)
    }

    /// Open the block holding the end of the iteration: the write-back moves
    /// followed by the goto back to the loop header.
    fn begin_trace(&mut self, trace: &Trace) -> CompilerResult<()> {
        let start = self.cfg.create_block(BlockRole::Normal);
        self.cfg.emit_block(start, false)?;
        self.insertion = Some(start);

        self.prepend(vec![Instruction::Goto { target: None }])?;
        self.loop_patches.push(start);
        self.emit_loopbacks(trace)
    }

    fn emit_loopbacks(&mut self, trace: &Trace) -> CompilerResult<()> {
        let mut moves = Vec::new();
        for write in collect_writes(trace) {
            let source = self.use_value(trace, write.source)?;
            let destination = self
                .use_value(trace, write.destination)?
                .as_slot()
                .ok_or_else(|| CompilerError::invariant(format!("local {} has no slot", write.destination)))?;
            if source == Operand::Undefined {
                log::trace!("[WRITEBACK] {} keeps its value, tail is untracked", destination);
                continue;
            }
            moves.push(Move::new(destination, source));
        }

        let slots = &mut self.slots;
        let mut temporaries = Vec::new();
        let ordered = schedule_moves(moves, |kind| {
            let temp = slots.allocate(kind, AllocationMode::ReusePreferred);
            temporaries.push(temp);
            temp
        });
        log::debug!(
            "[WRITEBACK] {} moves, {} temporaries",
            ordered.len(),
            temporaries.len()
        );

        self.prepend(ordered.into_iter().map(Move::into_instruction).collect())?;
        for temp in temporaries {
            self.slots.recycle(temp)?;
        }
        Ok(())
    }

    fn lower_instruction(&mut self, trace: &Trace, id: TraceValueId, region: Region) -> CompilerResult<()> {
        let instruction = trace.instruction(id)?;
        log::trace!("[TRACE-LOWER] {} = {:?}", id, instruction);

        match instruction {
            TraceInstruction::Builtin { op, operands } => {
                let result = self.define(id, op.result_kind())?;
                let operands = self.use_values(trace, operands)?;
                self.prepend(vec![Instruction::Builtin {
                    result,
                    op: *op,
                    operands,
                }])?;
                self.end_definition(id, result)
            }
            TraceInstruction::Call { method, operands, state } => {
                let result = self.define(id, method.result)?;
                let arguments = self.use_values(trace, operands)?;
                let frame = match state {
                    Some(state) => Some(self.frame_descriptor(trace, state)?),
                    None => None,
                };
                let convention = self.config.abi.select(method);
                self.prepend(vec![Instruction::Call {
                    result,
                    callee: Callee::Method(method.clone()),
                    convention,
                    arguments,
                    frame,
                }])?;
                self.end_definition(id, result)
            }
            TraceInstruction::Guard {
                kind,
                comparator,
                operands,
                state,
            } => match region {
                Region::Body => self.lower_guard(trace, id, *kind, *comparator, *operands, state.as_ref()),
                Region::Prologue => Err(CompilerError::unsupported(format!(
                    "guard {} in a trace prologue",
                    id
                ))),
            },
            TraceInstruction::InlinedCall { method, .. } => Err(CompilerError::unsupported(format!(
                "inlining {} into a trace",
                method.qualified_name()
            ))),
            // Leaves have no code of their own.
            TraceInstruction::Constant(_) | TraceInstruction::Local { .. } | TraceInstruction::Placeholder => Ok(()),
        }
    }

    fn lower_guard(
        &mut self,
        trace: &Trace,
        id: TraceValueId,
        kind: Kind,
        comparator: Comparator,
        operands: [TraceValueId; 2],
        state: Option<&FrameState>,
    ) -> CompilerResult<()> {
        let continuation = self
            .cfg
            .current()
            .ok_or_else(|| CompilerError::invariant("guard without a continuation block"))?;
        let bailout = self
            .bailout
            .ok_or_else(|| CompilerError::invariant("guard lowered before the bailout block exists"))?;

        let tag = self.use_value(trace, operands[0])?;
        let other = self.use_value(trace, operands[1])?;
        let frame = match state {
            Some(state) => Some(self.frame_descriptor(trace, state)?),
            None => None,
        };

        let block = self.cfg.create_block(BlockRole::Normal);
        self.cfg.emit_block(block, true)?;
        self.cfg.link(block, bailout)?;
        self.insertion = Some(block);

        let exit = GuardExit {
            site: id,
            kind,
            comparator,
            tag,
            other,
            frame,
        };
        self.prepend(exit.into_instructions(self.bailout_slot, bailout, continuation))
    }

    /// Resolve every pending goto to the loop header, the block the backward
    /// walk ended in.
    fn patch_loops(&mut self) -> CompilerResult<()> {
        let header = self
            .cfg
            .current()
            .ok_or_else(|| CompilerError::invariant("no loop header"))?;
        for block in std::mem::take(&mut self.loop_patches) {
            if self.cfg.resolve_gotos(block, header)? == 0 {
                return Err(CompilerError::invariant(format!("{} has no pending goto", block)));
            }
            self.cfg.link(block, header)?;
            log::debug!("[TRACE-LOWER] loop back {} -> {}", block, header);
        }
        Ok(())
    }

    fn lower_prologue(&mut self, trace: &Trace) -> CompilerResult<()> {
        let block = self.cfg.create_block(BlockRole::Normal);
        self.insertion = Some(block);
        for &id in trace.prologue().iter().rev() {
            self.lower_instruction(trace, id, Region::Prologue)?;
        }
        self.cfg.emit_block_if_not_empty(block, true)?;
        self.insertion = self.cfg.current();
        Ok(())
    }

    fn finalize(&mut self, trace: &Trace) -> CompilerResult<()> {
        let blocks = std::mem::take(&mut self.cfg).finish();
        for block in blocks.values() {
            if block.instructions().any(|i| matches!(i, Instruction::Goto { target: None })) {
                return Err(CompilerError::invariant(format!(
                    "unresolved loop-back edge in {}",
                    block.id()
                )));
            }
        }

        let mut method = LoweredMethod::new(trace.anchor.clone());
        method.set_generated(std::mem::take(&mut self.parameters), blocks, self.slots.slot_count());
        if self.config.verify {
            verify(&method)?;
        }

        log::debug!(
            "[TRACE-LOWER] generated {} blocks, {} slots, {} parameters",
            method.len(),
            method.slot_count(),
            method.parameters().len()
        );
        if self.config.dump_cfg {
            log::debug!("[TRACE-LOWER] lowered trace:\n{}", method);
        }

        self.method = Some(method);
        self.phase = LoweringPhase::Finalized;
        Ok(())
    }

    fn prepend(&mut self, instructions: Vec<Instruction>) -> CompilerResult<()> {
        let block = self
            .insertion
            .ok_or_else(|| CompilerError::invariant("no block to insert into"))?;
        self.cfg.prepend_to(block, instructions)
    }

    fn allocation_mode(&self, id: TraceValueId) -> AllocationMode {
        if self.invariants.contains(&id) {
            AllocationMode::NoReuse
        } else {
            AllocationMode::ReusePreferred
        }
    }

    /// Operand for a use of `id`. Constants become immediates and
    /// placeholders `Undefined`; anything else is bound to a slot.
    fn use_value(&mut self, trace: &Trace, id: TraceValueId) -> CompilerResult<Operand> {
        let instruction = trace.instruction(id)?;
        match instruction {
            TraceInstruction::Constant(value) => Ok(Operand::Immediate(*value)),
            TraceInstruction::Placeholder => Ok(Operand::Undefined),
            _ => {
                let kind = instruction.kind();
                if kind == Kind::Void {
                    return Err(CompilerError::invariant(format!("{} produces no value", id)));
                }
                let mode = self.allocation_mode(id);
                Ok(Operand::Slot(self.slots.allocate_for(id, kind, mode)?))
            }
        }
    }

    fn use_values(&mut self, trace: &Trace, ids: &[TraceValueId]) -> CompilerResult<Vec<Operand>> {
        ids.iter().map(|&id| self.use_value(trace, id)).collect()
    }

    /// Result slot of the instruction defining `id`, if it produces a value.
    fn define(&mut self, id: TraceValueId, kind: Kind) -> CompilerResult<Option<Slot>> {
        if kind == Kind::Void {
            return Ok(None);
        }
        let mode = self.allocation_mode(id);
        Ok(Some(self.slots.allocate_for(id, kind, mode)?))
    }

    /// The definition of `id` has been emitted; earlier code may reuse its slot.
    fn end_definition(&mut self, id: TraceValueId, result: Option<Slot>) -> CompilerResult<()> {
        if result.is_some() {
            self.slots.release(id)?;
        }
        Ok(())
    }

    fn frame_descriptor(&mut self, trace: &Trace, state: &FrameState) -> CompilerResult<FrameDescriptor> {
        Ok(FrameDescriptor {
            method: state.method.clone(),
            bytecode_position: state.bytecode_position,
            locals: self.use_values(trace, &state.locals)?,
            stack: self.use_values(trace, &state.stack)?,
        })
    }
}

fn not_finalized(phase: LoweringPhase) -> CompilerError {
    CompilerError::invariant(format!(
        "generated method accessed in phase {:?}, before finalization",
        phase
    ))
}

/// Lower `trace` with a fresh context.
pub fn lower_trace(trace: &Trace, config: LoweringConfig) -> CompilerResult<LoweredMethod> {
    let mut lowering = TraceLowering::new(config);
    lowering.lower(trace)?;
    lowering.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_presets() {
        let debug = LoweringConfig::debug();
        assert!(!debug.slot_reuse);
        assert!(debug.dump_cfg);

        let production = LoweringConfig::production();
        assert!(production.slot_reuse);
        assert!(!production.verify);

        let rendered = format!("{:?}", LoweringConfig::default());
        assert!(rendered.contains("abi: \"standard\""));
    }

    #[test]
    fn test_bailout_slot_is_the_first_slot() {
        let lowering = TraceLowering::new(LoweringConfig::default());
        assert_eq!(lowering.bailout_slot.serial(), 0);
        assert_eq!(lowering.bailout_slot.kind(), Kind::Reference);
        assert_eq!(lowering.phase(), LoweringPhase::Start);
        assert!(lowering.method().is_err());
    }
}
