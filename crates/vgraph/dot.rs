use crate::graph::FrameGraph;
use std::fmt::Write;

/// Renders the frame's DAG as GraphViz text. Live instruction nodes are
/// colored; literal value nodes keep the default style. Rasterizing the
/// output is left to external tooling.
pub(crate) fn to_dot(graph: &FrameGraph) -> String {
    let mut out = String::from("digraph value_graph {\n");
    for node in graph.nodes() {
        let label = format!("{}.{}", node.id.0, node.label);
        if node.live && !node.literal {
            let _ = writeln!(out, "  n{} [label=\"{}\", color=blue];", node.id.0, label);
        } else {
            let _ = writeln!(out, "  n{} [label=\"{}\"];", node.id.0, label);
        }
    }
    for (from, to) in graph.edges() {
        let _ = writeln!(out, "  n{} -> n{};", from.0, to.0);
    }
    out.push_str("}\n");
    out
}
