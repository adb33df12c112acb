//! Edge type classification for instruction graph edges

use serde::{Deserialize, Serialize};

use crate::program::{Stmt, StmtIndex};

/// Kind of control transfer between two statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// Conditional branch taken (true)
    TrueBranch,
    /// Conditional branch not taken (false)
    FalseBranch,
    /// Sequential fallthrough or unconditional jump
    Fallthrough,
    /// Switch case with its key
    Case(i64),
    /// Switch default target
    Default,
    /// Guarded statement to its handler
    Exception,
}

impl EdgeType {
    /// Color for DOT visualization
    pub fn dot_color(&self) -> &'static str {
        match self {
            EdgeType::TrueBranch => "green",
            EdgeType::FalseBranch => "red",
            EdgeType::Fallthrough => "black",
            EdgeType::Case(_) => "blue",
            EdgeType::Default => "orange",
            EdgeType::Exception => "purple",
        }
    }

    /// Label for DOT visualization
    pub fn dot_label(&self) -> String {
        match self {
            EdgeType::TrueBranch => "T".to_string(),
            EdgeType::FalseBranch => "F".to_string(),
            EdgeType::Fallthrough => String::new(),
            EdgeType::Case(key) => format!("case {}", key),
            EdgeType::Default => "default".to_string(),
            EdgeType::Exception => "catch".to_string(),
        }
    }
}

/// Outgoing control edges of `stmt` at `index` in a body of `len` statements.
///
/// Exception edges come from the trap table and are added separately.
pub fn classify_stmt(index: StmtIndex, stmt: &Stmt, len: usize) -> Vec<(StmtIndex, EdgeType)> {
    let next = index + 1;
    match stmt {
        Stmt::If { target, .. } => {
            let mut edges = vec![(*target, EdgeType::TrueBranch)];
            if next < len {
                edges.push((next, EdgeType::FalseBranch));
            }
            edges
        }
        Stmt::Goto { target } => vec![(*target, EdgeType::Fallthrough)],
        Stmt::Switch { cases, default, .. } => {
            let mut edges: Vec<_> = cases
                .iter()
                .map(|&(key, target)| (target, EdgeType::Case(key)))
                .collect();
            edges.push((*default, EdgeType::Default));
            edges
        }
        Stmt::Return { .. } | Stmt::Throw { .. } => vec![],
        _ if next < len => vec![(next, EdgeType::Fallthrough)],
        _ => vec![],
    }
}
