//! Parent/child relations derived from the edge list.
//!
//! The tree is never stored as such: a node's parent is the source of the
//! most recently added edge that targets it. Everything else (lineage,
//! children, siblings, connection checks) is built on [`get_parent`].

use std::collections::HashSet;

use crate::edge::Edge;
use crate::id::NodeId;
use crate::node::{get_node, Node};

/// Resolve a node's parent, scanning edges newest first so a leftover edge
/// from a half-applied change never wins over the current one.
pub fn get_parent<'a>(nodes: &'a [Node], edges: &[Edge], id: &NodeId) -> Option<&'a Node> {
    let edge = edges.iter().rev().find(|e| &e.target == id)?;
    get_node(nodes, &edge.source)
}

/// The node, its parent, its grandparent, ... up to and including the root.
///
/// Stops at the first revisited node so a corrupted (cyclic) edge list
/// cannot loop forever.
pub fn get_lineage<'a>(nodes: &'a [Node], edges: &[Edge], id: &NodeId) -> Vec<&'a Node> {
    let mut lineage = Vec::new();
    let mut seen: HashSet<&NodeId> = HashSet::new();
    let mut current = get_node(nodes, id);

    while let Some(node) = current {
        if !seen.insert(&node.id) {
            tracing::warn!(node = %node.id, start = %id, "cycle in lineage; truncating");
            break;
        }
        lineage.push(node);
        current = get_parent(nodes, edges, &node.id);
    }

    lineage
}

pub fn get_children<'a>(nodes: &'a [Node], edges: &[Edge], id: &NodeId) -> Vec<&'a Node> {
    nodes
        .iter()
        .filter(|node| get_parent(nodes, edges, &node.id).is_some_and(|p| &p.id == id))
        .collect()
}

/// Children authored by the model (edited or not).
pub fn get_assistant_children<'a>(nodes: &'a [Node], edges: &[Edge], id: &NodeId) -> Vec<&'a Node> {
    get_children(nodes, edges, id)
        .into_iter()
        .filter(|node| node.role.is_assistant())
        .collect()
}

/// Children of the node's parent, the node itself included. Empty for roots.
pub fn get_siblings<'a>(nodes: &'a [Node], edges: &[Edge], id: &NodeId) -> Vec<&'a Node> {
    match get_parent(nodes, edges, id) {
        Some(parent) => get_children(nodes, edges, &parent.id),
        None => Vec::new(),
    }
}

pub fn is_in_lineage(nodes: &[Node], edges: &[Edge], node_to_check: &NodeId, node_to_get_lineage_of: &NodeId) -> bool {
    get_lineage(nodes, edges, node_to_get_lineage_of)
        .iter()
        .any(|node| &node.id == node_to_check)
}

/// Whether `source → target` keeps the graph a forest: `target` must have
/// no parent yet and must not be an ancestor of `source` (or `source`
/// itself).
pub fn is_connection_allowed(nodes: &[Node], edges: &[Edge], source: &NodeId, target: &NodeId) -> bool {
    !is_in_lineage(nodes, edges, target, source) && get_parent(nodes, edges, target).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{add_edge, new_edge};
    use crate::node::{new_node, NodeRole, NodeSpec, Position};

    fn n(id: &str, role: NodeRole) -> Node {
        new_node(NodeSpec::new(role, "", Position::default()).with_id(id))
    }

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    fn ids(nodes: &[&Node]) -> Vec<String> {
        nodes.iter().map(|n| n.id.to_string()).collect()
    }

    fn chain() -> (Vec<Node>, Vec<Edge>) {
        let nodes = vec![n("sys1", NodeRole::System), n("u1", NodeRole::User), n("a1", NodeRole::Assistant)];
        let edges = vec![new_edge(id("sys1"), id("u1"), false), new_edge(id("u1"), id("a1"), false)];
        (nodes, edges)
    }

    #[test]
    fn test_lineage_runs_node_to_root() {
        let (nodes, edges) = chain();
        assert_eq!(ids(&get_lineage(&nodes, &edges, &id("a1"))), vec!["a1", "u1", "sys1"]);
    }

    #[test]
    fn test_lineage_of_unknown_is_empty() {
        let (nodes, edges) = chain();
        assert!(get_lineage(&nodes, &edges, &id("nope")).is_empty());
    }

    #[test]
    fn test_parent_prefers_newest_edge() {
        let nodes = vec![n("p1", NodeRole::User), n("p2", NodeRole::User), n("c", NodeRole::Assistant)];
        let edges = add_edge(&add_edge(&[], id("p1"), id("c"), false), id("p2"), id("c"), false);
        assert_eq!(get_parent(&nodes, &edges, &id("c")).map(|p| p.id.clone()), Some(id("p2")));
    }

    #[test]
    fn test_parent_with_missing_source_is_none() {
        let nodes = vec![n("c", NodeRole::User)];
        let edges = vec![new_edge(id("ghost"), id("c"), false)];
        assert!(get_parent(&nodes, &edges, &id("c")).is_none());
    }

    #[test]
    fn test_lineage_terminates_on_cycle() {
        let nodes = vec![n("a", NodeRole::User), n("b", NodeRole::User)];
        let edges = vec![new_edge(id("a"), id("b"), false), new_edge(id("b"), id("a"), false)];
        assert_eq!(ids(&get_lineage(&nodes, &edges, &id("a"))), vec!["a", "b"]);
    }

    #[test]
    fn test_children_and_siblings() {
        let (mut nodes, mut edges) = chain();
        nodes.push(n("a2", NodeRole::EditedAssistant));
        nodes.push(n("u2", NodeRole::User));
        edges = add_edge(&edges, id("u1"), id("a2"), false);
        edges = add_edge(&edges, id("u1"), id("u2"), false);

        assert_eq!(ids(&get_children(&nodes, &edges, &id("u1"))), vec!["a1", "a2", "u2"]);
        assert_eq!(ids(&get_assistant_children(&nodes, &edges, &id("u1"))), vec!["a1", "a2"]);
        assert_eq!(ids(&get_siblings(&nodes, &edges, &id("a2"))), vec!["a1", "a2", "u2"]);
        assert!(get_siblings(&nodes, &edges, &id("sys1")).is_empty());
    }

    #[test]
    fn test_connection_rejected_when_target_has_parent() {
        let (mut nodes, edges) = chain();
        nodes.push(n("x", NodeRole::User));
        assert!(!is_connection_allowed(&nodes, &edges, &id("x"), &id("a1")));
    }

    #[test]
    fn test_connection_rejected_when_it_closes_a_cycle() {
        let (nodes, edges) = chain();
        assert!(!is_connection_allowed(&nodes, &edges, &id("a1"), &id("sys1")));
        assert!(!is_connection_allowed(&nodes, &edges, &id("a1"), &id("a1")));
    }

    #[test]
    fn test_connection_allowed_between_separate_trees() {
        let (mut nodes, edges) = chain();
        nodes.push(n("root2", NodeRole::System));
        assert!(is_connection_allowed(&nodes, &edges, &id("a1"), &id("root2")));
    }
}
