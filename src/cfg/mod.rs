//! Instruction graph of method bodies
//!
//! One node per statement. The engine itself steps over the statement list
//! and asks the graph for successors, handlers and loop headers.

pub mod analysis;
pub mod edge;
pub mod export;
pub mod loops;

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::program::{Body, Method, MethodId, Program, Stmt, StmtIndex, Trap};

pub use analysis::{find_entry, find_exits, is_branch_point, is_merge_point};
pub use edge::{classify_stmt, EdgeType};
pub use export::{export_dot, export_json, CfgExport, EdgeExport, NodeExport};
pub use loops::{detect_natural_loops, find_loop_headers, NaturalLoop};

/// Instruction graph over statement nodes
pub type Cfg = DiGraph<StmtNode, EdgeType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Entry,
    Normal,
    Exit,
}

/// A statement node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StmtNode {
    pub index: StmtIndex,
    pub kind: NodeKind,
    pub label: String,
}

/// Graph and handler table of one method body.
#[derive(Debug, Clone)]
pub struct InstructionGraph {
    method: MethodId,
    body: Body,
    graph: Cfg,
    loop_headers: HashSet<StmtIndex>,
}

impl InstructionGraph {
    pub fn build(method: MethodId, body: &Body) -> Self {
        let len = body.stmts.len();
        let mut graph = Cfg::new();
        for (index, stmt) in body.stmts.iter().enumerate() {
            let kind = if index == 0 {
                NodeKind::Entry
            } else if matches!(stmt, Stmt::Return { .. } | Stmt::Throw { .. }) {
                NodeKind::Exit
            } else {
                NodeKind::Normal
            };
            graph.add_node(StmtNode {
                index,
                kind,
                label: stmt.to_string(),
            });
        }

        for (index, stmt) in body.stmts.iter().enumerate() {
            for (target, edge) in classify_stmt(index, stmt, len) {
                graph.add_edge(NodeIndex::new(index), NodeIndex::new(target), edge);
            }
        }
        for trap in &body.traps {
            for index in trap.begin..trap.end {
                graph.add_edge(
                    NodeIndex::new(index),
                    NodeIndex::new(trap.handler),
                    EdgeType::Exception,
                );
            }
        }

        let loop_headers = find_loop_headers(&graph)
            .into_iter()
            .map(|node| node.index())
            .collect();

        Self {
            method,
            body: body.clone(),
            graph,
            loop_headers,
        }
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn entry(&self) -> StmtIndex {
        0
    }

    pub fn len(&self) -> usize {
        self.body.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.stmts.is_empty()
    }

    pub fn stmt(&self, index: StmtIndex) -> Option<&Stmt> {
        self.body.stmts.get(index)
    }

    /// Statement executed after `index` when it completes normally without
    /// branching.
    pub fn successor(&self, index: StmtIndex) -> Option<StmtIndex> {
        match self.stmt(index)? {
            Stmt::Goto { target } => Some(*target),
            stmt if stmt.falls_through() && index + 1 < self.len() => Some(index + 1),
            _ => None,
        }
    }

    /// Explicit jump targets with their edge kinds.
    pub fn branch_targets(&self, index: StmtIndex) -> Vec<(StmtIndex, EdgeType)> {
        match self.stmt(index) {
            Some(stmt) => classify_stmt(index, stmt, self.len()),
            None => Vec::new(),
        }
    }

    /// Traps guarding `index`, innermost (first declared) first.
    pub fn handlers_for(&self, index: StmtIndex) -> impl Iterator<Item = &Trap> {
        self.body.traps.iter().filter(move |t| t.covers(index))
    }

    pub fn is_loop_header(&self, index: StmtIndex) -> bool {
        self.loop_headers.contains(&index)
    }

    pub fn loop_headers(&self) -> &HashSet<StmtIndex> {
        &self.loop_headers
    }

    pub fn graph(&self) -> &Cfg {
        &self.graph
    }
}

/// Instruction graphs of every method with a body, built once per program.
#[derive(Debug, Default)]
pub struct ProgramGraphs {
    graphs: HashMap<MethodId, Arc<InstructionGraph>>,
}

impl ProgramGraphs {
    pub fn build(program: &Program) -> Self {
        let graphs = program
            .methods()
            .filter_map(|m: &Method| {
                m.body()
                    .map(|body| (m.id, Arc::new(InstructionGraph::build(m.id, body))))
            })
            .collect();
        Self { graphs }
    }

    pub fn get(&self, method: MethodId) -> Option<&Arc<InstructionGraph>> {
        self.graphs.get(&method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn loop_body() -> Body {
        // 0: i = 0
        // 1: if i >= 3 goto 4
        // 2: i = i + 1
        // 3: goto 1
        // 4: return i
        serde_json::from_str(
            r#"{"stmts":[
                {"op":"assign","target":{"local":"i"},"value":{"use":{"const":{"int":0}}}},
                {"op":"if","cond":{"op":"ge","lhs":{"local":"i"},"rhs":{"const":{"int":3}}},"target":4},
                {"op":"assign","target":{"local":"i"},"value":{"binary":{"op":"add","lhs":{"local":"i"},"rhs":{"const":{"int":1}}}}},
                {"op":"goto","target":1},
                {"op":"return","value":{"local":"i"}}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_build_graph() {
        let graph = InstructionGraph::build(MethodId(0), &loop_body());
        assert_eq!(graph.graph().node_count(), 5);
        assert_eq!(graph.entry(), 0);
        assert_eq!(graph.successor(0), Some(1));
        assert_eq!(graph.successor(3), Some(1));
        assert_eq!(graph.successor(4), None);
    }

    #[test]
    fn test_loop_header_detected() {
        let graph = InstructionGraph::build(MethodId(0), &loop_body());
        assert!(graph.is_loop_header(1));
        assert!(!graph.is_loop_header(0));
        assert_eq!(graph.loop_headers().len(), 1);
    }

    #[test]
    fn test_handlers_for() {
        let body: Body = serde_json::from_str(
            r#"{"stmts":[{"op":"nop"},{"op":"nop"},{"op":"return"},
                {"op":"identity","local":"e","value":{"kind":"caught_exception"}},
                {"op":"return"}],
               "traps":[{"begin":0,"end":2,"handler":3,"exception":"java.lang.RuntimeException"}]}"#,
        )
        .unwrap();
        let graph = InstructionGraph::build(MethodId(0), &body);
        assert_eq!(graph.handlers_for(1).count(), 1);
        assert_eq!(graph.handlers_for(2).count(), 0);
        let exception_edges = graph
            .graph()
            .edge_weights()
            .filter(|e| **e == EdgeType::Exception)
            .count();
        assert_eq!(exception_edges, 2);
    }
}
