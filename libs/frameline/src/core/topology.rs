// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Topology snapshot of a built pipeline, for inspection and debugging.

use serde::Serialize;

/// A stage in the graph.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub name: String,
    pub input_slots: usize,
    pub output_slots: usize,
}

/// A connection between two stages.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeInfo {
    pub from: String,
    pub from_slot: usize,
    pub to: String,
    pub to_slot: usize,
    /// Connector execution mode ("direct", "threaded-queue", ...).
    pub mode: String,
    pub capacity: usize,
}

/// Point-in-time picture of the stage/connector graph.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TopologySnapshot {
    pub nodes: Vec<NodeInfo>,
    pub edges: Vec<EdgeInfo>,
}

impl TopologySnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Export as GraphViz DOT, renderable with `dot -Tpng`.
    pub fn to_graphviz(&self) -> String {
        let mut dot = String::from("digraph Pipeline {\n");
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box];\n\n");

        for node in &self.nodes {
            dot.push_str(&format!("  \"{}\";\n", node.name));
        }
        dot.push('\n');
        for edge in &self.edges {
            dot.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{} cap={}\"];\n",
                edge.from, edge.to, edge.mode, edge.capacity
            ));
        }
        dot.push_str("}\n");
        dot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TopologySnapshot {
        TopologySnapshot {
            nodes: vec![
                NodeInfo {
                    name: "decoder".into(),
                    input_slots: 1,
                    output_slots: 1,
                },
                NodeInfo {
                    name: "presenter".into(),
                    input_slots: 1,
                    output_slots: 1,
                },
            ],
            edges: vec![EdgeInfo {
                from: "decoder".into(),
                from_slot: 0,
                to: "presenter".into(),
                to_slot: 0,
                mode: "threaded-queue".into(),
                capacity: 4,
            }],
        }
    }

    #[test]
    fn graphviz_contains_nodes_and_edges() {
        let dot = sample().to_graphviz();
        assert!(dot.contains("digraph Pipeline"));
        assert!(dot.contains("\"decoder\""));
        assert!(dot.contains("\"decoder\" -> \"presenter\""));
        assert!(dot.contains("cap=4"));
    }

    #[test]
    fn json_round_trips_through_serde() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["nodes"][0]["name"], "decoder");
        assert_eq!(value["edges"][0]["capacity"], 4);
    }
}
