//! Undo/redo over whole-state snapshots.
//!
//! ## Guarantees
//! - Bounded: both stacks hold at most `capacity` entries; the oldest entry
//!   is evicted first
//! - Every new snapshot clears the redo stack
//! - `undo` then `redo` with no snapshot in between returns the exact state
//!   that was current before the undo
//!
//! ## NOT Responsible For
//! - Deciding when to snapshot. Callers snapshot the pre-mutation state
//!   before every state-changing action; a mutation that skips it cannot be
//!   undone.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::edge::Edge;
use crate::id::NodeId;
use crate::node::Node;

/// Default bound for both stacks.
pub const MAX_HISTORY_SIZE: usize = 256;

/// Everything undo restores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub selected_node_id: Option<NodeId>,
    pub last_selected_node_id: Option<NodeId>,
}

/// Two bounded stacks of snapshots.
#[derive(Debug, Clone)]
pub struct History<S> {
    /// Oldest at front.
    past: VecDeque<S>,
    /// Most recently undone at back.
    future: VecDeque<S>,
    capacity: usize,
}

impl<S> Default for History<S> {
    fn default() -> Self {
        Self::new(MAX_HISTORY_SIZE)
    }
}

impl<S> History<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn push_bounded(stack: &mut VecDeque<S>, state: S, capacity: usize) {
        while stack.len() >= capacity {
            stack.pop_front();
        }
        stack.push_back(state);
    }

    /// Record the pre-mutation state and forget anything undone.
    pub fn snapshot(&mut self, current: S) {
        Self::push_bounded(&mut self.past, current, self.capacity);
        self.future.clear();
    }

    /// Step back. Returns the state to restore, or `None` with nothing to
    /// undo (in which case `current` is dropped and nothing changes).
    pub fn undo(&mut self, current: S) -> Option<S> {
        let previous = self.past.pop_back()?;
        Self::push_bounded(&mut self.future, current, self.capacity);
        Some(previous)
    }

    /// Step forward again after an undo.
    pub fn redo(&mut self, current: S) -> Option<S> {
        let next = self.future.pop_back()?;
        Self::push_bounded(&mut self.past, current, self.capacity);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Snapshots available to undo, oldest first.
    pub fn past(&self) -> impl Iterator<Item = &S> {
        self.past.iter()
    }

    pub fn future_len(&self) -> usize {
        self.future.len()
    }

    pub fn past_len(&self) -> usize {
        self.past.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_eviction_with_max_two() {
        let mut h = History::new(2);
        h.snapshot("S1");
        h.snapshot("S2");
        h.snapshot("S3");
        assert_eq!(h.past().copied().collect::<Vec<_>>(), vec!["S2", "S3"]);
    }

    #[test]
    fn test_undo_on_empty_is_noop() {
        let mut h: History<u32> = History::new(4);
        assert_eq!(h.undo(7), None);
        assert_eq!(h.future_len(), 0);
    }

    #[test]
    fn test_redo_on_empty_is_noop() {
        let mut h: History<u32> = History::new(4);
        assert_eq!(h.redo(7), None);
        assert_eq!(h.past_len(), 0);
    }

    #[test]
    fn test_undo_then_redo_round_trips() {
        let mut h = History::new(8);
        h.snapshot(1);
        // current is 2
        let restored = h.undo(2).expect("undo");
        assert_eq!(restored, 1);
        let again = h.redo(restored).expect("redo");
        assert_eq!(again, 2);
        assert!(h.can_undo());
        assert!(!h.can_redo());
    }

    #[test]
    fn test_snapshot_clears_future() {
        let mut h = History::new(8);
        h.snapshot(1);
        h.undo(2);
        assert!(h.can_redo());
        h.snapshot(1);
        assert!(!h.can_redo());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut h = History::new(0);
        assert_eq!(h.capacity(), 1);
        h.snapshot(1);
        h.snapshot(2);
        assert_eq!(h.past_len(), 1);
    }

    #[test]
    fn test_future_is_bounded_too() {
        let mut h = History::new(2);
        for i in 0..2 {
            h.snapshot(i);
        }
        // Undo everything, future holds at most 2.
        let mut cur = 10;
        while let Some(prev) = h.undo(cur) {
            cur = prev;
        }
        assert_eq!(h.future_len(), 2);
    }
}
