//! Three-level strict-priority FIFO
//!
//! `pop` always drains the highest non-empty level. There is no aging, so a
//! sustained stream of high-priority work starves lower levels indefinitely.

use std::collections::VecDeque;

use crate::domain::Priority;

/// Strict-priority queue with FIFO order inside each level
#[derive(Debug)]
pub struct PriorityQueue<T> {
    levels: [VecDeque<T>; Priority::LEVELS],
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self {
            levels: std::array::from_fn(|_| VecDeque::new()),
        }
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T, priority: Priority) {
        self.levels[priority.level()].push_back(item);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.levels.iter_mut().find_map(|level| level.pop_front())
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }

    pub fn len_at(&self, priority: Priority) -> usize {
        self.levels[priority.level()].len()
    }

    /// Remove every item, highest level first
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.levels.iter_mut().flat_map(|level| level.drain(..))
    }
}
