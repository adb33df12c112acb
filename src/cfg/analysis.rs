//! Basic queries over an instruction graph

use crate::cfg::{Cfg, NodeKind};
use petgraph::graph::NodeIndex;
use petgraph::Direction;

/// Find the entry node (statement 0)
pub fn find_entry(cfg: &Cfg) -> Option<NodeIndex> {
    cfg.node_indices().next()
}

/// Find all nodes that leave the method (return or throw)
pub fn find_exits(cfg: &Cfg) -> Vec<NodeIndex> {
    cfg.node_indices()
        .filter(|&n| cfg.node_weight(n).map(|s| s.kind) == Some(NodeKind::Exit))
        .collect()
}

/// A merge point has more than one predecessor
pub fn is_merge_point(cfg: &Cfg, node: NodeIndex) -> bool {
    cfg.neighbors_directed(node, Direction::Incoming).count() > 1
}

/// A branch point has more than one normal successor
pub fn is_branch_point(cfg: &Cfg, node: NodeIndex) -> bool {
    cfg.edges_directed(node, Direction::Outgoing)
        .filter(|e| *e.weight() != crate::cfg::EdgeType::Exception)
        .count()
        > 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::InstructionGraph;
    use crate::program::{Body, MethodId};

    fn diamond() -> InstructionGraph {
        // 0: if a == 0 goto 3
        // 1: a = 1
        // 2: goto 3
        // 3: return a
        let body: Body = serde_json::from_str(
            r#"{"stmts":[
                {"op":"if","cond":{"op":"eq","lhs":{"local":"a"},"rhs":{"const":{"int":0}}},"target":3},
                {"op":"assign","target":{"local":"a"},"value":{"use":{"const":{"int":1}}}},
                {"op":"goto","target":3},
                {"op":"return","value":{"local":"a"}}
            ]}"#,
        )
        .unwrap();
        InstructionGraph::build(MethodId(0), &body)
    }

    #[test]
    fn test_find_entry_and_exits() {
        let graph = diamond();
        assert_eq!(find_entry(graph.graph()), Some(NodeIndex::new(0)));
        assert_eq!(find_exits(graph.graph()), vec![NodeIndex::new(3)]);
    }

    #[test]
    fn test_branch_and_merge() {
        let graph = diamond();
        assert!(is_branch_point(graph.graph(), NodeIndex::new(0)));
        assert!(!is_branch_point(graph.graph(), NodeIndex::new(1)));
        assert!(is_merge_point(graph.graph(), NodeIndex::new(3)));
    }

    #[test]
    fn test_empty_graph() {
        let graph = Cfg::new();
        assert!(find_entry(&graph).is_none());
        assert!(find_exits(&graph).is_empty());
    }
}
