//! Instruction graph export to DOT and JSON formats

use crate::cfg::{analysis, InstructionGraph, NodeKind};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Export a method graph to DOT format for Graphviz
pub fn export_dot(graph: &InstructionGraph, name: &str) -> String {
    let cfg = graph.graph();
    let mut dot = format!("digraph \"{}\" {{\n", escape_dot_string(name));
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=rounded];\n\n");

    for node_idx in cfg.node_indices() {
        let Some(node) = cfg.node_weight(node_idx) else {
            continue;
        };
        let label = escape_dot_string(&format!("{}: {}", node.index, node.label));
        let style = match node.kind {
            NodeKind::Entry => "fillcolor=lightgreen, style=filled",
            NodeKind::Exit => "fillcolor=lightcoral, style=filled",
            NodeKind::Normal if graph.is_loop_header(node.index) => {
                "fillcolor=lightblue, style=filled"
            }
            NodeKind::Normal => "",
        };
        writeln!(dot, "  \"{}\" [label=\"{}\" {}];", node.index, label, style).ok();
    }

    dot.push('\n');
    for edge in cfg.edge_indices() {
        let (Some((from, to)), Some(edge_type)) = (cfg.edge_endpoints(edge), cfg.edge_weight(edge))
        else {
            continue;
        };
        let label = edge_type.dot_label();
        let label_attr = if label.is_empty() {
            String::new()
        } else {
            format!(", label=\"{}\"", label)
        };
        writeln!(
            dot,
            "  \"{}\" -> \"{}\" [color={}, style={}{}];",
            from.index(),
            to.index(),
            edge_type.dot_color(),
            if *edge_type == crate::cfg::EdgeType::Exception {
                "dashed"
            } else {
                "solid"
            },
            label_attr
        )
        .ok();
    }

    dot.push_str("}\n");
    dot
}

fn escape_dot_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn format_node_kind(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Entry => "ENTRY",
        NodeKind::Normal => "NORMAL",
        NodeKind::Exit => "EXIT",
    }
}

/// Complete graph export for JSON serialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgExport {
    pub method: String,
    pub entry: Option<usize>,
    pub exits: Vec<usize>,
    pub loop_headers: Vec<usize>,
    pub nodes: Vec<NodeExport>,
    pub edges: Vec<EdgeExport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExport {
    pub id: usize,
    pub kind: String,
    pub stmt: String,
    pub is_branch: bool,
    pub is_merge: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeExport {
    pub from: usize,
    pub to: usize,
    pub kind: String,
}

pub fn export_json(graph: &InstructionGraph, name: &str) -> CfgExport {
    let cfg = graph.graph();
    let mut loop_headers: Vec<usize> = graph.loop_headers().iter().copied().collect();
    loop_headers.sort_unstable();

    CfgExport {
        method: name.to_string(),
        entry: analysis::find_entry(cfg).map(|idx| idx.index()),
        exits: analysis::find_exits(cfg).iter().map(|idx| idx.index()).collect(),
        loop_headers,
        nodes: cfg
            .node_indices()
            .filter_map(|idx| {
                let node = cfg.node_weight(idx)?;
                Some(NodeExport {
                    id: node.index,
                    kind: format_node_kind(node.kind).to_string(),
                    stmt: node.label.clone(),
                    is_branch: analysis::is_branch_point(cfg, idx),
                    is_merge: analysis::is_merge_point(cfg, idx),
                })
            })
            .collect(),
        edges: cfg
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = cfg.edge_endpoints(e)?;
                Some(EdgeExport {
                    from: from.index(),
                    to: to.index(),
                    kind: format!("{:?}", cfg.edge_weight(e)?),
                })
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Body, MethodId};

    fn graph() -> InstructionGraph {
        let body: Body = serde_json::from_str(
            r#"{"stmts":[
                {"op":"if","cond":{"op":"lt","lhs":{"local":"a"},"rhs":{"const":{"int":0}}},"target":2},
                {"op":"return","value":{"const":{"int":1}}},
                {"op":"return","value":{"const":{"int":2}}}
            ]}"#,
        )
        .unwrap();
        InstructionGraph::build(MethodId(0), &body)
    }

    #[test]
    fn test_export_dot() {
        let dot = export_dot(&graph(), "demo.A.f(int)");
        assert!(dot.starts_with("digraph \"demo.A.f(int)\""));
        assert!(dot.contains("\"0\" -> \"2\" [color=green"));
        assert!(dot.contains("label=\"F\""));
        assert!(dot.contains("lightcoral"));
    }

    #[test]
    fn test_export_json() {
        let export = export_json(&graph(), "f");
        assert_eq!(export.entry, Some(0));
        assert_eq!(export.exits, vec![1, 2]);
        assert_eq!(export.nodes.len(), 3);
        assert!(export.nodes[0].is_branch);
        assert!(!export.nodes[1].is_merge);
        assert_eq!(export.edges.len(), 2);
        let json = serde_json::to_string(&export).unwrap();
        assert!(json.contains("\"kind\":\"TrueBranch\""));
    }
}
