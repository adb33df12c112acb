//! Natural loop detection using dominance analysis
//!
//! The engine bounds how many times a state may re-enter a loop header, so it
//! only needs the headers; bodies are kept for `symex cfg` output.

use crate::cfg::analysis::find_entry;
use crate::cfg::Cfg;
use petgraph::algo::dominators::simple_fast;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use std::collections::{HashSet, VecDeque};

/// A natural loop: a back-edge `tail -> header` where the header dominates
/// the tail.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: NodeIndex,
    pub back_edge: (NodeIndex, NodeIndex),
    /// All nodes in the loop body, header included
    pub body: HashSet<NodeIndex>,
}

impl NaturalLoop {
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.body.contains(&node)
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Detect all natural loops of a graph.
///
/// Returns an empty vec for an empty graph or a graph without back-edges.
pub fn detect_natural_loops(cfg: &Cfg) -> Vec<NaturalLoop> {
    let Some(entry) = find_entry(cfg) else {
        return vec![];
    };
    let dominators = simple_fast(cfg, entry);

    let mut loops = Vec::new();
    for edge in cfg.edge_references() {
        let tail = edge.source();
        let header = edge.target();
        let Some(mut tail_dominators) = dominators.dominators(tail) else {
            continue;
        };
        if tail_dominators.any(|d| d == header) {
            loops.push(NaturalLoop {
                header,
                back_edge: (tail, header),
                body: compute_loop_body(cfg, header, tail),
            });
        }
    }
    loops
}

/// Header plus every node reaching the tail without passing the header.
fn compute_loop_body(cfg: &Cfg, header: NodeIndex, tail: NodeIndex) -> HashSet<NodeIndex> {
    let mut body = HashSet::new();
    let mut worklist = VecDeque::from([tail]);

    while let Some(node) = worklist.pop_front() {
        if node == header || !body.insert(node) {
            continue;
        }
        for pred in cfg.neighbors_directed(node, petgraph::Direction::Incoming) {
            if pred != header && !body.contains(&pred) {
                worklist.push_back(pred);
            }
        }
    }

    body.insert(header);
    body
}

pub fn find_loop_headers(cfg: &Cfg) -> HashSet<NodeIndex> {
    detect_natural_loops(cfg)
        .into_iter()
        .map(|loop_| loop_.header)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::InstructionGraph;
    use crate::program::{Body, MethodId};

    fn nested_loops() -> InstructionGraph {
        // 0: i = 0
        // 1: if i >= 2 goto 8
        // 2: j = 0
        // 3: if j >= 2 goto 6
        // 4: j = j + 1
        // 5: goto 3
        // 6: i = i + 1
        // 7: goto 1
        // 8: return
        let body: Body = serde_json::from_str(
            r#"{"stmts":[
                {"op":"assign","target":{"local":"i"},"value":{"use":{"const":{"int":0}}}},
                {"op":"if","cond":{"op":"ge","lhs":{"local":"i"},"rhs":{"const":{"int":2}}},"target":8},
                {"op":"assign","target":{"local":"j"},"value":{"use":{"const":{"int":0}}}},
                {"op":"if","cond":{"op":"ge","lhs":{"local":"j"},"rhs":{"const":{"int":2}}},"target":6},
                {"op":"assign","target":{"local":"j"},"value":{"binary":{"op":"add","lhs":{"local":"j"},"rhs":{"const":{"int":1}}}}},
                {"op":"goto","target":3},
                {"op":"assign","target":{"local":"i"},"value":{"binary":{"op":"add","lhs":{"local":"i"},"rhs":{"const":{"int":1}}}}},
                {"op":"goto","target":1},
                {"op":"return"}
            ]}"#,
        )
        .unwrap();
        InstructionGraph::build(MethodId(0), &body)
    }

    #[test]
    fn test_detect_nested_loops() {
        let graph = nested_loops();
        let loops = detect_natural_loops(graph.graph());
        assert_eq!(loops.len(), 2);

        let outer = loops
            .iter()
            .find(|l| l.header == NodeIndex::new(1))
            .unwrap();
        let inner = loops
            .iter()
            .find(|l| l.header == NodeIndex::new(3))
            .unwrap();
        assert!(outer.contains(NodeIndex::new(4)));
        assert!(!inner.contains(NodeIndex::new(6)));
        assert_eq!(inner.size(), 3);
    }

    #[test]
    fn test_no_loops_in_straight_line() {
        let body: Body =
            serde_json::from_str(r#"{"stmts":[{"op":"nop"},{"op":"return"}]}"#).unwrap();
        let graph = InstructionGraph::build(MethodId(0), &body);
        assert!(find_loop_headers(graph.graph()).is_empty());
    }
}
