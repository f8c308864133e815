//! # Loop Write-Back
//!
//! When control loops back, every entry local that the loop both reads and
//! rewrites must receive its end-of-iteration value. The writes form a
//! parallel assignment: all sources are read "at once", so a write may only be
//! emitted after every pending write that still reads its destination.
//!
//! [`schedule_moves`] sequentializes such a set. Independent moves are emitted
//! lowest position first; when only cycles remain, one destination is saved
//! into a temporary slot and the readers of that destination are redirected to
//! the temporary.

use crate::lir::{Instruction, Operand, Slot};
use hotpath_trace::{Kind, Trace, TraceValueId};

/// A loop-carried update: `destination` (an entry local) takes `source`
/// (its tail value) when control loops back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    /// Position in the entry/tail state
    pub position: usize,
    pub source: TraceValueId,
    pub destination: TraceValueId,
}

/// Compare entry and tail state and record every local that is read on the
/// trace and holds a different value at the loop tail.
pub fn collect_writes(trace: &Trace) -> Vec<WriteRecord> {
    trace
        .entry_state()
        .iter()
        .zip(trace.tail_state())
        .enumerate()
        .filter(|(_, (entry, tail))| {
            entry != tail && trace.local_flags(**entry).map_or(false, |flags| flags.read)
        })
        .map(|(position, (&destination, &source))| WriteRecord {
            position,
            source,
            destination,
        })
        .collect()
}

/// A slot-level copy, `destination := source`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Move {
    pub destination: Slot,
    pub source: Operand,
}

impl Move {
    pub fn new(destination: Slot, source: impl Into<Operand>) -> Self {
        Self {
            destination,
            source: source.into(),
        }
    }

    pub fn is_redundant(&self) -> bool {
        self.source == Operand::Slot(self.destination)
    }

    pub fn into_instruction(self) -> Instruction {
        Instruction::Assign {
            destination: self.destination,
            source: self.source,
        }
    }
}

/// Order a parallel move set for sequential execution.
///
/// `moves` must have pairwise distinct destinations. `temporary` is called
/// once per cycle to obtain a scratch slot of the given kind that is not
/// otherwise live at this point.
pub fn schedule_moves(moves: Vec<Move>, mut temporary: impl FnMut(Kind) -> Slot) -> Vec<Move> {
    let mut pending: Vec<Move> = moves.into_iter().filter(|m| !m.is_redundant()).collect();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|candidate| {
            let destination = Operand::Slot(candidate.destination);
            !pending.iter().any(|other| other.source == destination)
        });

        match ready {
            Some(index) => {
                let next = pending.remove(index);
                log::trace!("[WRITEBACK] {} := {}", next.destination, next.source);
                ordered.push(next);
            }
            None => {
                // Every destination is still read by another move.
                let saved = pending[0].destination;
                let temp = temporary(saved.kind());
                log::debug!("[WRITEBACK] breaking cycle at {} through {}", saved, temp);
                ordered.push(Move::new(temp, saved));
                for other in pending.iter_mut() {
                    if other.source == Operand::Slot(saved) {
                        other.source = Operand::Slot(temp);
                    }
                }
            }
        }
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotpath_trace::{Builtin, MethodRef, TraceBuilder, Value};
    use std::collections::HashMap;

    fn slot(serial: u32) -> Slot {
        Slot::new(Kind::Int, serial)
    }

    /// Run `moves` sequentially over an initial state where slot `n` holds `n`.
    fn interpret(moves: &[Move]) -> HashMap<Slot, i64> {
        let mut state: HashMap<Slot, i64> = (0..32).map(|n| (slot(n), n as i64)).collect();
        for m in moves {
            let value = match m.source {
                Operand::Slot(source) => state[&source],
                Operand::Immediate(Value::Int(v)) => v as i64,
                other => panic!("unexpected operand {}", other),
            };
            state.insert(m.destination, value);
        }
        state
    }

    fn temporaries(first: u32) -> impl FnMut(Kind) -> Slot {
        let mut next = first;
        move |kind| {
            let temp = Slot::new(kind, next);
            next += 1;
            temp
        }
    }

    #[test]
    fn test_swap_goes_through_a_temporary() {
        let (x, y) = (slot(1), slot(2));
        let moves = schedule_moves(vec![Move::new(x, y), Move::new(y, x)], temporaries(20));

        let t = slot(20);
        assert_eq!(moves, vec![Move::new(t, x), Move::new(x, y), Move::new(y, t)]);

        let state = interpret(&moves);
        assert_eq!(state[&x], 2);
        assert_eq!(state[&y], 1);
    }

    #[test]
    fn test_three_cycle_rotates() {
        let (a, b, c) = (slot(1), slot(2), slot(3));
        let moves = schedule_moves(
            vec![Move::new(a, b), Move::new(b, c), Move::new(c, a)],
            temporaries(20),
        );

        assert_eq!(moves.len(), 4);
        let state = interpret(&moves);
        assert_eq!((state[&a], state[&b], state[&c]), (2, 3, 1));
    }

    #[test]
    fn test_acyclic_chain_emits_one_move_per_write() {
        // a <- b, b <- c, c <- 7: must run in exactly that order
        let (a, b, c) = (slot(1), slot(2), slot(3));
        let moves = schedule_moves(
            vec![
                Move::new(c, Operand::Immediate(Value::Int(7))),
                Move::new(b, c),
                Move::new(a, b),
            ],
            |_| panic!("no temporary needed"),
        );

        assert_eq!(moves.len(), 3);
        assert_eq!(moves[0].destination, a);
        let state = interpret(&moves);
        assert_eq!((state[&a], state[&b], state[&c]), (2, 3, 7));
    }

    #[test]
    fn test_independent_moves_keep_their_order() {
        let moves = schedule_moves(
            vec![Move::new(slot(1), slot(5)), Move::new(slot(2), slot(6)), Move::new(slot(3), slot(7))],
            |_| panic!("no temporary needed"),
        );
        let destinations: Vec<u32> = moves.iter().map(|m| m.destination.serial()).collect();
        assert_eq!(destinations, vec![1, 2, 3]);
    }

    #[test]
    fn test_self_moves_are_dropped() {
        let moves = schedule_moves(vec![Move::new(slot(4), slot(4))], |_| panic!("no temporary needed"));
        assert!(moves.is_empty());
    }

    #[test]
    fn test_cycle_with_a_tail() {
        // x <- y, y <- x, z <- x: z must see the old x
        let (x, y, z) = (slot(1), slot(2), slot(3));
        let moves = schedule_moves(
            vec![Move::new(x, y), Move::new(y, x), Move::new(z, x)],
            temporaries(20),
        );

        let state = interpret(&moves);
        assert_eq!((state[&x], state[&y], state[&z]), (2, 1, 1));
    }

    #[test]
    fn test_collect_writes_skips_unread_and_unchanged_locals() {
        let mut b = TraceBuilder::new(MethodRef::new("Loop", "run", vec![], Kind::Void), 0);
        let i = b.local(Kind::Int);
        let limit = b.local(Kind::Int);
        let scratch = b.local(Kind::Int);
        let one = b.constant(Value::Int(1));
        let next = b.builtin(Builtin::IntAdd, &[i, one]);
        b.builtin(Builtin::IntSub, &[limit, i]);
        b.store(i, next);
        b.store(scratch, one);
        let trace = b.build().unwrap();

        assert_eq!(
            collect_writes(&trace),
            vec![WriteRecord {
                position: 0,
                source: next,
                destination: i,
            }]
        );
    }
}
