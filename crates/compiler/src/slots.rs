//! # Slot Allocation
//!
//! Hands out kind-tagged slots and binds trace values to them. Because the
//! lowering pass runs backwards, a value is bound at its last use and released
//! at its definition; released slots go onto a per-kind stack and are handed
//! out again, most recent first, to values that prefer reuse.

use crate::lir::Slot;
use crate::{CompilerError, CompilerResult};
use hotpath_trace::{Kind, TraceValueId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationMode {
    /// Always mint a fresh slot. Used for loop-invariant values, which are
    /// live around the back edge and must not share a slot with anything.
    NoReuse,
    /// Take the most recently recycled slot of the kind, if any
    ReusePreferred,
}

#[derive(Debug)]
pub struct SlotAllocator {
    next_serial: u32,
    recycled: [Vec<Slot>; 6],
    bindings: HashMap<TraceValueId, Slot>,
    bound: HashSet<Slot>,
    /// Values whose definition has been reached; nothing above it may read them
    released: HashSet<TraceValueId>,
    reuse: bool,
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SlotAllocator {
    /// With `reuse` off every allocation behaves as [`AllocationMode::NoReuse`].
    pub fn new(reuse: bool) -> Self {
        Self {
            next_serial: 0,
            recycled: Default::default(),
            bindings: HashMap::new(),
            bound: HashSet::new(),
            released: HashSet::new(),
            reuse,
        }
    }

    pub fn allocate(&mut self, kind: Kind, mode: AllocationMode) -> Slot {
        if self.reuse && mode == AllocationMode::ReusePreferred {
            if let Some(slot) = self.recycled[kind.index()].pop() {
                log::trace!("[SLOTS] reusing {}", slot);
                return slot;
            }
        }
        let slot = Slot::new(kind, self.next_serial);
        self.next_serial += 1;
        log::trace!("[SLOTS] minted {}", slot);
        slot
    }

    /// Bind `value` to `slot`. A slot holds at most one live value, and a
    /// released value cannot come back: its slot may already hold another.
    pub fn bind(&mut self, value: TraceValueId, slot: Slot) -> CompilerResult<()> {
        if self.released.contains(&value) {
            return Err(CompilerError::invariant(format!(
                "{} is read after its slot was released at the definition",
                value
            )));
        }
        if self.bindings.contains_key(&value) {
            return Err(CompilerError::invariant(format!("{} is already bound", value)));
        }
        if !self.bound.insert(slot) {
            return Err(CompilerError::invariant(format!(
                "{} cannot be bound to {}: the slot holds another live value",
                value, slot
            )));
        }
        self.bindings.insert(value, slot);
        Ok(())
    }

    pub fn lookup(&self, value: TraceValueId) -> Option<Slot> {
        self.bindings.get(&value).copied()
    }

    /// The slot bound to `value`, allocating and binding one on first use.
    pub fn allocate_for(&mut self, value: TraceValueId, kind: Kind, mode: AllocationMode) -> CompilerResult<Slot> {
        if let Some(slot) = self.lookup(value) {
            return Ok(slot);
        }
        let slot = self.allocate(kind, mode);
        self.bind(value, slot)?;
        Ok(slot)
    }

    /// End the lifetime of `value` and recycle its slot.
    pub fn release(&mut self, value: TraceValueId) -> CompilerResult<Slot> {
        let slot = self
            .bindings
            .remove(&value)
            .ok_or_else(|| CompilerError::invariant(format!("release of unbound value {}", value)))?;
        self.bound.remove(&slot);
        self.released.insert(value);
        self.recycled[slot.kind().index()].push(slot);
        log::trace!("[SLOTS] released {} ({})", slot, value);
        Ok(slot)
    }

    /// Return an unbound scratch slot to the pool.
    pub fn recycle(&mut self, slot: Slot) -> CompilerResult<()> {
        if self.bound.contains(&slot) {
            return Err(CompilerError::invariant(format!("{} is still bound", slot)));
        }
        if self.recycled[slot.kind().index()].contains(&slot) {
            return Err(CompilerError::invariant(format!("{} recycled twice", slot)));
        }
        self.recycled[slot.kind().index()].push(slot);
        Ok(())
    }

    /// Number of slots minted so far
    pub fn slot_count(&self) -> u32 {
        self.next_serial
    }

    pub fn live_count(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recycled_slots_are_reused_most_recent_first() {
        let mut slots = SlotAllocator::new(true);
        let a = slots.allocate_for(TraceValueId(0), Kind::Int, AllocationMode::ReusePreferred).unwrap();
        let b = slots.allocate_for(TraceValueId(1), Kind::Int, AllocationMode::ReusePreferred).unwrap();
        assert_ne!(a, b);

        slots.release(TraceValueId(0)).unwrap();
        slots.release(TraceValueId(1)).unwrap();

        assert_eq!(slots.allocate(Kind::Int, AllocationMode::ReusePreferred), b);
        assert_eq!(slots.allocate(Kind::Int, AllocationMode::ReusePreferred), a);
        assert_eq!(slots.slot_count(), 2);
    }

    #[test]
    fn test_no_reuse_always_mints() {
        let mut slots = SlotAllocator::new(true);
        slots.allocate_for(TraceValueId(0), Kind::Int, AllocationMode::ReusePreferred).unwrap();
        slots.release(TraceValueId(0)).unwrap();

        let fresh = slots.allocate(Kind::Int, AllocationMode::NoReuse);
        assert_eq!(fresh.serial(), 1);
    }

    #[test]
    fn test_pools_are_per_kind() {
        let mut slots = SlotAllocator::new(true);
        slots.allocate_for(TraceValueId(0), Kind::Int, AllocationMode::ReusePreferred).unwrap();
        slots.release(TraceValueId(0)).unwrap();

        let d = slots.allocate(Kind::Double, AllocationMode::ReusePreferred);
        assert_eq!(d.kind(), Kind::Double);
        assert_eq!(d.serial(), 1);
    }

    #[test]
    fn test_reuse_disabled() {
        let mut slots = SlotAllocator::new(false);
        slots.allocate_for(TraceValueId(0), Kind::Int, AllocationMode::ReusePreferred).unwrap();
        slots.release(TraceValueId(0)).unwrap();
        assert_eq!(slots.allocate(Kind::Int, AllocationMode::ReusePreferred).serial(), 1);
    }

    #[test]
    fn test_double_release_is_an_invariant_violation() {
        let mut slots = SlotAllocator::default();
        slots.allocate_for(TraceValueId(3), Kind::Reference, AllocationMode::ReusePreferred).unwrap();
        slots.release(TraceValueId(3)).unwrap();

        assert!(matches!(
            slots.release(TraceValueId(3)),
            Err(CompilerError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_released_value_cannot_be_rebound() {
        let mut slots = SlotAllocator::default();
        let a = slots.allocate_for(TraceValueId(0), Kind::Int, AllocationMode::ReusePreferred).unwrap();
        slots.release(TraceValueId(0)).unwrap();

        // The slot goes to a value defined further up
        let b = slots.allocate_for(TraceValueId(1), Kind::Int, AllocationMode::ReusePreferred).unwrap();
        assert_eq!(a, b);

        assert!(matches!(
            slots.allocate_for(TraceValueId(0), Kind::Int, AllocationMode::ReusePreferred),
            Err(CompilerError::InvariantViolation(_))
        ));
        slots.release(TraceValueId(1)).unwrap();
        assert!(slots.bind(TraceValueId(0), a).is_err());
        assert_eq!(slots.live_count(), 0);
    }

    #[test]
    fn test_bound_slot_cannot_be_shared() {
        let mut slots = SlotAllocator::default();
        let a = slots.allocate_for(TraceValueId(0), Kind::Int, AllocationMode::ReusePreferred).unwrap();
        assert!(slots.bind(TraceValueId(1), a).is_err());
        assert!(slots.recycle(a).is_err());
    }

    /// Pseudo-random allocate/bind/release sequences never leave two live
    /// values sharing a slot.
    #[test]
    fn test_live_values_never_share_a_slot() {
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _round in 0..50 {
            let mut slots = SlotAllocator::new(true);
            let mut live: Vec<TraceValueId> = Vec::new();
            let mut next_value = 0u32;

            for _step in 0..200 {
                let roll = next();
                if live.is_empty() || roll % 3 != 0 {
                    let kind = Kind::ALL[(roll >> 8) as usize % 3];
                    let mode = if roll & 0x10 == 0 {
                        AllocationMode::ReusePreferred
                    } else {
                        AllocationMode::NoReuse
                    };
                    let value = TraceValueId(next_value);
                    next_value += 1;
                    slots.allocate_for(value, kind, mode).unwrap();
                    live.push(value);
                } else {
                    let index = (roll >> 16) as usize % live.len();
                    let value = live.swap_remove(index);
                    slots.release(value).unwrap();
                }

                let mut seen = HashSet::new();
                for value in &live {
                    let slot = slots.lookup(*value).unwrap();
                    assert!(seen.insert(slot), "{} shared between live values", slot);
                }
                assert_eq!(slots.live_count(), live.len());
            }
        }
    }
}
