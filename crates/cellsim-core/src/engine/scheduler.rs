use crate::core::io::checkpoint::PendingAction;
use crate::core::models::ids::MoleculeId;
use crate::core::models::molecule::ActionKind;
use ordered_float::NotNan;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledAction {
    time: NotNan<f64>,
    sequence: u64,
    molecule: MoleculeId,
    kind: ActionKind,
}

/// Time-ordered queue of per-molecule actions.
///
/// Entries with equal times come out in insertion order. Entries are never removed
/// eagerly; consumers discard stale ones on pop (the molecule was retired, or its pending
/// time moved).
#[derive(Debug, Clone, Default)]
pub struct EventScheduler {
    heap: BinaryHeap<Reverse<ScheduledAction>>,
    next_sequence: u64,
}

impl EventScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an action. Non-finite times are ignored.
    pub fn schedule(&mut self, time: f64, molecule: MoleculeId, kind: ActionKind) -> bool {
        let Ok(time) = NotNan::new(time) else {
            return false;
        };
        if !time.is_finite() {
            return false;
        }
        self.heap.push(Reverse(ScheduledAction {
            time,
            sequence: self.next_sequence,
            molecule,
            kind,
        }));
        self.next_sequence += 1;
        true
    }

    pub fn peek_time(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(a)| a.time.into_inner())
    }

    /// Pops the earliest action whose time is strictly below `horizon`.
    pub fn pop_before(&mut self, horizon: f64) -> Option<(f64, MoleculeId, ActionKind)> {
        if self.peek_time()? >= horizon {
            return None;
        }
        self.heap
            .pop()
            .map(|Reverse(a)| (a.time.into_inner(), a.molecule, a.kind))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Drops entries of molecules for which `keep` is false.
    pub fn retain(&mut self, mut keep: impl FnMut(MoleculeId) -> bool) {
        self.heap.retain(|Reverse(a)| keep(a.molecule));
    }

    /// Pending entries in pop order, plus the next sequence number.
    pub fn snapshot(&self) -> (Vec<PendingAction>, u64) {
        let mut entries: Vec<ScheduledAction> = self.heap.iter().map(|Reverse(a)| *a).collect();
        entries.sort();
        let pending = entries
            .into_iter()
            .map(|a| PendingAction {
                time: a.time.into_inner(),
                sequence: a.sequence,
                molecule: a.molecule,
                kind: a.kind,
            })
            .collect();
        (pending, self.next_sequence)
    }

    /// Rebuilds the queue exactly, preserving the original tie-break sequence numbers.
    pub fn restore(pending: &[PendingAction], next_sequence: u64) -> Self {
        let heap = pending
            .iter()
            .filter_map(|p| {
                NotNan::new(p.time).ok().map(|time| {
                    Reverse(ScheduledAction {
                        time,
                        sequence: p.sequence,
                        molecule: p.molecule,
                        kind: p.kind,
                    })
                })
            })
            .collect();
        Self {
            heap,
            next_sequence,
        }
    }
}
