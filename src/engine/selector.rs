//! Path selection strategies
//!
//! The engine only offers and polls; which state runs next is up to the
//! selector.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::state::ExecutionState;

pub trait PathSelector {
    fn offer(&mut self, state: ExecutionState);

    fn poll(&mut self) -> Option<ExecutionState>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

/// Oldest state first.
#[derive(Debug, Default)]
pub struct BfsSelector {
    queue: VecDeque<ExecutionState>,
}

impl PathSelector for BfsSelector {
    fn offer(&mut self, state: ExecutionState) {
        self.queue.push_back(state);
    }

    fn poll(&mut self) -> Option<ExecutionState> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Newest state first.
#[derive(Debug, Default)]
pub struct DfsSelector {
    stack: Vec<ExecutionState>,
}

impl PathSelector for DfsSelector {
    fn offer(&mut self, state: ExecutionState) {
        self.stack.push(state);
    }

    fn poll(&mut self) -> Option<ExecutionState> {
        self.stack.pop()
    }

    fn len(&self) -> usize {
        self.stack.len()
    }

    fn clear(&mut self) {
        self.stack.clear();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Bfs,
    Dfs,
}

impl Strategy {
    pub fn selector(self) -> Box<dyn PathSelector> {
        match self {
            Strategy::Bfs => Box::new(BfsSelector::default()),
            Strategy::Dfs => Box::new(DfsSelector::default()),
        }
    }
}
