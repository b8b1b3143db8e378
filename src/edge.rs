//! Parent → child edges.

use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::node::Node;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Always `"{source}-{target}"`.
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    /// Set while a generation is streaming into `target`.
    #[serde(default)]
    pub animated: bool,
}

pub fn edge_id(source: &NodeId, target: &NodeId) -> String {
    format!("{}-{}", source, target)
}

pub fn new_edge(source: NodeId, target: NodeId, animated: bool) -> Edge {
    Edge {
        id: edge_id(&source, &target),
        source,
        target,
        animated,
    }
}

pub fn add_edge(edges: &[Edge], source: NodeId, target: NodeId, animated: bool) -> Vec<Edge> {
    let mut out = edges.to_vec();
    out.push(new_edge(source, target, animated));
    out
}

pub fn set_edge_animated(edges: &[Edge], source: &NodeId, target: &NodeId, animated: bool) -> Vec<Edge> {
    let id = edge_id(source, target);
    edges
        .iter()
        .map(|edge| {
            if edge.id == id {
                Edge { animated, ..edge.clone() }
            } else {
                edge.clone()
            }
        })
        .collect()
}

pub fn remove_edge(edges: &[Edge], id: &str) -> Vec<Edge> {
    edges.iter().filter(|e| e.id != id).cloned().collect()
}

/// Point an existing edge at new endpoints, keeping its place in the list.
pub fn reconnect_edge(edges: &[Edge], id: &str, source: NodeId, target: NodeId) -> Vec<Edge> {
    edges
        .iter()
        .map(|edge| {
            if edge.id == id {
                new_edge(source.clone(), target.clone(), edge.animated)
            } else {
                edge.clone()
            }
        })
        .collect()
}

/// Drop every edge with a missing endpoint.
pub fn prune_dangling_edges(nodes: &[Node], edges: &[Edge]) -> Vec<Edge> {
    let ids: std::collections::HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();
    edges
        .iter()
        .filter(|e| ids.contains(&e.source) && ids.contains(&e.target))
        .cloned()
        .collect()
}
