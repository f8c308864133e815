//! # Control Flow Graph Construction
//!
//! Blocks are created in an arena and *emitted* as the backward walk reaches
//! the region they belong to. The most recently emitted block is the current
//! one and sits at the front of the emission order, so the final order is
//! execution order without any reversal step.
//!
//! Also provides the output verifier and a `petgraph` export of a finished
//! [`LoweredMethod`].

use crate::lir::{Block, BlockId, BlockRole, Instruction, LoweredMethod, Slot};
use crate::{CompilerError, CompilerResult};
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Default)]
pub struct CfgBuilder {
    blocks: Vec<Block>,
    /// Emitted blocks, current first
    order: VecDeque<BlockId>,
}

impl CfgBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_block(&mut self, role: BlockRole) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id, role));
        id
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    fn block_mut(&mut self, id: BlockId) -> CompilerResult<&mut Block> {
        self.blocks
            .get_mut(id.index())
            .ok_or_else(|| CompilerError::invariant(format!("unknown block {}", id)))
    }

    /// The block instructions are currently prepended to
    pub fn current(&self) -> Option<BlockId> {
        self.order.front().copied()
    }

    /// Make `id` the current block and give it the next serial. With `link`
    /// set, `id` becomes a predecessor of the previously current block.
    pub fn emit_block(&mut self, id: BlockId, link: bool) -> CompilerResult<()> {
        let serial = self.order.len() as u32;
        if !self.block_mut(id)?.set_serial(serial) {
            return Err(CompilerError::invariant(format!("block {} emitted twice", id)));
        }
        if link {
            if let Some(previous) = self.current() {
                self.link(id, previous)?;
            }
        }
        log::debug!("[TRACE-LOWER] emitted {} as B{} (link: {})", id, serial, link);
        self.order.push_front(id);
        Ok(())
    }

    /// Emit `id` unless it holds no instructions; returns whether it was emitted.
    pub fn emit_block_if_not_empty(&mut self, id: BlockId, link: bool) -> CompilerResult<bool> {
        let empty = self
            .block(id)
            .ok_or_else(|| CompilerError::invariant(format!("unknown block {}", id)))?
            .is_empty();
        if empty {
            log::debug!("[TRACE-LOWER] dropping empty block {}", id);
            return Ok(false);
        }
        self.emit_block(id, link)?;
        Ok(true)
    }

    pub fn link(&mut self, from: BlockId, to: BlockId) -> CompilerResult<()> {
        self.block_mut(to)?.predecessors.insert(from);
        self.block_mut(from)?.successors.insert(to);
        Ok(())
    }

    /// Insert `instructions`, kept in the given order, at the start of `id`.
    pub fn prepend_to(&mut self, id: BlockId, instructions: Vec<Instruction>) -> CompilerResult<()> {
        let block = self.block_mut(id)?;
        for instruction in instructions.into_iter().rev() {
            block.instructions.push_front(instruction);
        }
        Ok(())
    }

    pub fn prepend(&mut self, instructions: Vec<Instruction>) -> CompilerResult<()> {
        let current = self
            .current()
            .ok_or_else(|| CompilerError::invariant("no current block"))?;
        self.prepend_to(current, instructions)
    }

    /// Point every unresolved `Goto` in `id` at `header`. Returns the number
    /// of gotos patched.
    pub fn resolve_gotos(&mut self, id: BlockId, header: BlockId) -> CompilerResult<usize> {
        let mut patched = 0;
        for instruction in self.block_mut(id)?.instructions.iter_mut() {
            if let Instruction::Goto { target } = instruction {
                if target.is_none() {
                    *target = Some(header);
                    patched += 1;
                }
            }
        }
        Ok(patched)
    }

    /// Emitted blocks in execution order; blocks that were never emitted are dropped.
    pub fn finish(self) -> IndexMap<BlockId, Block> {
        let mut arena: Vec<Option<Block>> = self.blocks.into_iter().map(Some).collect();
        self.order
            .into_iter()
            .filter_map(|id| arena.get_mut(id.index()).and_then(Option::take))
            .map(|block| (block.id(), block))
            .collect()
    }
}

/// Check the structural invariants of a finished method.
pub fn verify(method: &LoweredMethod) -> CompilerResult<()> {
    if !method.is_generated() {
        return Err(CompilerError::invariant("verifying a method that was never generated"));
    }

    let mut serials = HashSet::new();
    for block in method.blocks() {
        let id = block.id();
        if block.is_empty() {
            return Err(CompilerError::invariant(format!("block {} is empty", id)));
        }
        match block.serial() {
            Some(serial) if serials.insert(serial) => {}
            Some(serial) => return Err(CompilerError::invariant(format!("serial {} used twice", serial))),
            None => return Err(CompilerError::invariant(format!("block {} was never emitted", id))),
        }

        for instruction in block.instructions() {
            if let Instruction::Goto { target: None } = instruction {
                return Err(CompilerError::invariant(format!("unresolved goto in {}", id)));
            }
            for target in instruction.branch_targets() {
                if method.block(target).is_none() {
                    return Err(CompilerError::invariant(format!("{} branches to missing {}", id, target)));
                }
                if !block.successors().contains(&target) {
                    return Err(CompilerError::invariant(format!(
                        "{} branches to {} without a successor edge",
                        id, target
                    )));
                }
            }
        }

        for successor in block.successors() {
            let linked = method
                .block(*successor)
                .map_or(false, |s| s.predecessors().contains(&id));
            if !linked {
                return Err(CompilerError::invariant(format!("edge {} -> {} is one-sided", id, successor)));
            }
        }
        for predecessor in block.predecessors() {
            let linked = method
                .block(*predecessor)
                .map_or(false, |p| p.successors().contains(&id));
            if !linked {
                return Err(CompilerError::invariant(format!("edge {} -> {} is one-sided", predecessor, id)));
            }
        }
    }
    verify_slot_definitions(method)
}

/// Every slot read on some path from the entry is written earlier on that
/// path or is a parameter. A slot recycled while its value was still needed
/// shows up here as a read with no reaching write.
fn verify_slot_definitions(method: &LoweredMethod) -> CompilerResult<()> {
    let blocks: Vec<&Block> = method.blocks().collect();

    // Upward-exposed reads and writes of each block
    let mut summaries: HashMap<BlockId, (HashSet<Slot>, HashSet<Slot>)> = HashMap::new();
    for block in &blocks {
        let mut exposed = HashSet::new();
        let mut written = HashSet::new();
        let code: Vec<&Instruction> = block.instructions().collect();
        for instruction in code.into_iter().rev() {
            if let Some(slot) = instruction.writes() {
                exposed.remove(&slot);
                written.insert(slot);
            }
            exposed.extend(instruction.reads());
        }
        summaries.insert(block.id(), (exposed, written));
    }

    let mut live_in: HashMap<BlockId, HashSet<Slot>> = HashMap::new();
    let mut changed = true;
    while changed {
        changed = false;
        for block in blocks.iter().rev() {
            let (exposed, written) = &summaries[&block.id()];
            let mut live = exposed.clone();
            for successor in block.successors() {
                if let Some(successor_live) = live_in.get(successor) {
                    live.extend(successor_live.iter().filter(|slot| !written.contains(*slot)));
                }
            }
            let previous = live_in.entry(block.id()).or_default();
            if previous.len() != live.len() {
                *previous = live;
                changed = true;
            }
        }
    }

    let entry = match method.entry() {
        Some(entry) => entry,
        None => return Ok(()),
    };
    let parameters: HashSet<Slot> = method.parameters().iter().copied().collect();
    let undefined = live_in
        .get(&entry)
        .into_iter()
        .flatten()
        .filter(|slot| !parameters.contains(*slot))
        .min();
    match undefined {
        Some(slot) => Err(CompilerError::invariant(format!(
            "{} is read before any write reaches it from {}",
            slot, entry
        ))),
        None => Ok(()),
    }
}

/// Classification of a CFG edge in the exported graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfgEdge {
    Fallthrough,
    GuardFailure,
    LoopBack,
}

impl fmt::Display for CfgEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfgEdge::Fallthrough => f.write_str("fallthrough"),
            CfgEdge::GuardFailure => f.write_str("guard failure"),
            CfgEdge::LoopBack => f.write_str("loop back"),
        }
    }
}

impl LoweredMethod {
    /// Export the CFG as a `petgraph` graph. Node weights are block ids; node
    /// indices follow execution order.
    pub fn to_graph(&self) -> DiGraph<BlockId, CfgEdge> {
        let mut graph = DiGraph::with_capacity(self.len(), self.len() * 2);
        let nodes: HashMap<BlockId, NodeIndex> = self.block_ids().map(|id| (id, graph.add_node(id))).collect();

        for block in self.blocks() {
            let (mut loop_targets, mut exit_targets) = (HashSet::new(), HashSet::new());
            for instruction in block.instructions() {
                match instruction {
                    Instruction::Goto { target: Some(target) } => {
                        loop_targets.insert(*target);
                    }
                    Instruction::Switch { targets, .. } => exit_targets.extend(targets.iter().copied()),
                    _ => {}
                }
            }

            for successor in block.successors() {
                let edge = if loop_targets.contains(successor) {
                    CfgEdge::LoopBack
                } else if exit_targets.contains(successor) {
                    CfgEdge::GuardFailure
                } else {
                    CfgEdge::Fallthrough
                };
                if let (Some(&from), Some(&to)) = (nodes.get(&block.id()), nodes.get(successor)) {
                    graph.add_edge(from, to, edge);
                }
            }
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::Operand;
    use hotpath_trace::{Builtin, Kind, MethodRef, Value};

    fn ret() -> Instruction {
        Instruction::Return {
            value: Operand::Immediate(Value::Int(0)),
        }
    }

    #[test]
    fn test_emission_order_is_reversed_into_execution_order() {
        let mut cfg = CfgBuilder::new();
        let last = cfg.create_block(BlockRole::Normal);
        let first = cfg.create_block(BlockRole::Normal);

        cfg.emit_block(last, false).unwrap();
        cfg.prepend(vec![ret()]).unwrap();
        cfg.emit_block(first, true).unwrap();
        cfg.prepend(vec![Instruction::Goto { target: Some(last) }]).unwrap();

        let blocks = cfg.finish();
        let order: Vec<BlockId> = blocks.keys().copied().collect();
        assert_eq!(order, vec![first, last]);
        assert_eq!(blocks[&last].serial(), Some(0));
        assert_eq!(blocks[&first].serial(), Some(1));
        assert!(blocks[&first].successors().contains(&last));
        assert!(blocks[&last].predecessors().contains(&first));
    }

    #[test]
    fn test_prepend_keeps_batch_order() {
        let mut cfg = CfgBuilder::new();
        let block = cfg.create_block(BlockRole::Normal);
        cfg.emit_block(block, false).unwrap();
        cfg.prepend(vec![ret()]).unwrap();
        cfg.prepend(vec![Instruction::Guardpoint { frame: None }, Instruction::Goto { target: None }])
            .unwrap();

        let kinds: Vec<bool> = cfg
            .block(block)
            .unwrap()
            .instructions()
            .map(|i| matches!(i, Instruction::Guardpoint { .. }))
            .collect();
        assert_eq!(kinds, vec![true, false, false]);
    }

    #[test]
    fn test_block_cannot_be_emitted_twice() {
        let mut cfg = CfgBuilder::new();
        let block = cfg.create_block(BlockRole::Normal);
        cfg.emit_block(block, false).unwrap();
        assert!(matches!(
            cfg.emit_block(block, false),
            Err(CompilerError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_empty_blocks_are_not_emitted() {
        let mut cfg = CfgBuilder::new();
        let block = cfg.create_block(BlockRole::Normal);
        assert!(!cfg.emit_block_if_not_empty(block, true).unwrap());
        assert!(cfg.finish().is_empty());
    }

    #[test]
    fn test_verify_rejects_unresolved_goto() {
        let mut cfg = CfgBuilder::new();
        let block = cfg.create_block(BlockRole::Normal);
        cfg.emit_block(block, false).unwrap();
        cfg.prepend(vec![Instruction::Goto { target: None }]).unwrap();

        let mut method = LoweredMethod::new(MethodRef::new("Loop", "run", vec![], Kind::Void));
        method.set_generated(Vec::new(), cfg.finish(), 0);
        assert!(verify(&method).is_err());
    }

    fn method_with(parameters: Vec<Slot>, cfg: CfgBuilder) -> LoweredMethod {
        let mut method = LoweredMethod::new(MethodRef::new("Loop", "run", vec![], Kind::Void));
        method.set_generated(parameters, cfg.finish(), 4);
        method
    }

    #[test]
    fn test_verify_rejects_reads_without_a_reaching_write() {
        let value = Slot::new(Kind::Int, 1);
        let mut cfg = CfgBuilder::new();
        let block = cfg.create_block(BlockRole::Normal);
        cfg.emit_block(block, false).unwrap();
        cfg.prepend(vec![Instruction::Return {
            value: Operand::Slot(value),
        }])
        .unwrap();

        assert!(matches!(
            verify(&method_with(Vec::new(), cfg)),
            Err(CompilerError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_verify_accepts_parameters_and_earlier_writes() {
        let parameter = Slot::new(Kind::Int, 0);
        let value = Slot::new(Kind::Int, 1);
        let mut cfg = CfgBuilder::new();
        let block = cfg.create_block(BlockRole::Normal);
        cfg.emit_block(block, false).unwrap();
        cfg.prepend(vec![
            Instruction::Builtin {
                result: Some(value),
                op: Builtin::IntAdd,
                operands: vec![Operand::Slot(parameter), Operand::Immediate(Value::Int(1))],
            },
            Instruction::Return {
                value: Operand::Slot(value),
            },
        ])
        .unwrap();

        assert!(verify(&method_with(vec![parameter], cfg)).is_ok());
    }

    /// The slot written at the end of the loop reaches the header only around
    /// the back edge, so the first iteration reads it undefined.
    #[test]
    fn test_verify_follows_reads_around_the_back_edge() {
        let counter = Slot::new(Kind::Int, 0);
        let carried = Slot::new(Kind::Int, 1);
        let mut cfg = CfgBuilder::new();
        let tail = cfg.create_block(BlockRole::Normal);
        let header = cfg.create_block(BlockRole::Normal);
        cfg.emit_block(tail, false).unwrap();
        cfg.prepend(vec![
            Instruction::Assign {
                destination: carried,
                source: Operand::Slot(counter),
            },
            Instruction::Goto { target: None },
        ])
        .unwrap();
        cfg.emit_block(header, true).unwrap();
        cfg.prepend(vec![Instruction::Builtin {
            result: Some(counter),
            op: Builtin::IntAdd,
            operands: vec![Operand::Slot(carried), Operand::Immediate(Value::Int(1))],
        }])
        .unwrap();
        cfg.resolve_gotos(tail, header).unwrap();
        cfg.link(tail, header).unwrap();

        let error = verify(&method_with(vec![counter], cfg)).unwrap_err();
        assert!(error.to_string().contains(&carried.to_string()));
    }

    #[test]
    fn test_verify_requires_successor_edges_for_branches() {
        let mut cfg = CfgBuilder::new();
        let target = cfg.create_block(BlockRole::Normal);
        let source = cfg.create_block(BlockRole::Normal);
        cfg.emit_block(target, false).unwrap();
        cfg.prepend(vec![ret()]).unwrap();
        cfg.emit_block(source, false).unwrap();
        cfg.prepend(vec![Instruction::Goto { target: Some(target) }]).unwrap();

        let mut method = LoweredMethod::new(MethodRef::new("Loop", "run", vec![], Kind::Void));
        method.set_generated(Vec::new(), cfg.finish(), 0);
        assert!(verify(&method).is_err());
    }
}
