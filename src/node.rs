//! Conversation nodes and the pure transforms over a node list.
//!
//! Every transform takes the current nodes by reference and returns a new
//! `Vec<Node>`; callers never observe in-place mutation, which keeps history
//! snapshots independent of the live state. Lookups by an unknown id leave
//! the list unchanged.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{FluxError, Result};
use crate::id::{generate_node_id, NodeId, StreamEpoch};
use crate::label::{format_auto_label, TRUNCATION_SUFFIX};

/// Horizontal gap between the rightmost existing node and a new tree root.
pub const NEW_TREE_X_OFFSET: f64 = 600.0;

/// x of the first root when the canvas is empty.
pub const FIRST_TREE_X: f64 = 0.0;

/// y of every new tree root.
pub const NEW_TREE_Y: f64 = 500.0;

/// Vertical distance from a parent to its children (before jitter).
pub const CHILD_Y_OFFSET: f64 = 100.0;

/// Upper bound of the random y jitter that keeps siblings from overlapping.
pub const OVERLAP_RANDOMNESS_MAX: f64 = 20.0;

/// Who authored a node's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    System,
    User,
    Assistant,
    /// Assistant text that a human has since edited.
    EditedAssistant,
}

impl NodeRole {
    pub fn is_assistant(self) -> bool {
        matches!(self, NodeRole::Assistant | NodeRole::EditedAssistant)
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(display_name(*self))
    }
}

/// Default label for a node with no text.
pub fn display_name(role: NodeRole) -> &'static str {
    match role {
        NodeRole::System => "System",
        NodeRole::User => "User",
        NodeRole::Assistant => "Assistant",
        NodeRole::EditedAssistant => "Assistant (edited)",
    }
}

/// Canvas position. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    pub text: String,
    pub label: String,
    #[serde(default)]
    pub has_custom_label: bool,
    /// Active-stream marker; `Some` while a generation owns this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamEpoch>,
    pub position: Position,
    #[serde(default)]
    pub selected: bool,
}

/// Parameters for [`add_node`].
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Fixed id; a fresh one is generated when `None`.
    pub id: Option<NodeId>,
    pub position: Position,
    pub role: NodeRole,
    pub text: String,
    pub stream: Option<StreamEpoch>,
}

impl NodeSpec {
    pub fn new(role: NodeRole, text: impl Into<String>, position: Position) -> Self {
        Self {
            id: None,
            position,
            role,
            text: text.into(),
            stream: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_stream(mut self, epoch: StreamEpoch) -> Self {
        self.stream = Some(epoch);
        self
    }
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

pub fn new_node(spec: NodeSpec) -> Node {
    Node {
        id: spec.id.unwrap_or_else(generate_node_id),
        role: spec.role,
        text: spec.text,
        label: display_name(spec.role).to_string(),
        has_custom_label: false,
        stream: spec.stream,
        position: spec.position,
        selected: false,
    }
}

/// Random y offset in `[0, OVERLAP_RANDOMNESS_MAX)`.
pub fn overlap_jitter() -> f64 {
    rand::thread_rng().gen_range(0.0..OVERLAP_RANDOMNESS_MAX)
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

pub fn add_node(nodes: &[Node], spec: NodeSpec) -> Vec<Node> {
    let mut out = nodes.to_vec();
    out.push(new_node(spec));
    out
}

/// Append a fresh System → User root pair to the right of every existing
/// node. The caller links them with an edge.
pub fn add_user_node_linked_to_system_node(
    nodes: &[Node],
    system_text: &str,
    user_text: &str,
    system_id: NodeId,
    user_id: NodeId,
) -> Vec<Node> {
    let x = nodes
        .iter()
        .map(|n| n.position.x)
        .reduce(f64::max)
        .map(|max_x| max_x + NEW_TREE_X_OFFSET)
        .unwrap_or(FIRST_TREE_X);

    let system = new_node(
        NodeSpec::new(NodeRole::System, system_text, Position::new(x, NEW_TREE_Y)).with_id(system_id),
    );
    let user_y = system.position.y + CHILD_Y_OFFSET + overlap_jitter();
    let user = new_node(NodeSpec::new(NodeRole::User, user_text, Position::new(x, user_y)).with_id(user_id));

    let mut out = nodes.to_vec();
    out.push(system);
    out.push(user);
    out
}

fn map_node(nodes: &[Node], id: &NodeId, f: impl FnOnce(&mut Node)) -> Vec<Node> {
    let mut f = Some(f);
    nodes
        .iter()
        .map(|node| {
            let mut copy = node.clone();
            if &node.id == id {
                if let Some(f) = f.take() {
                    f(&mut copy);
                }
            }
            copy
        })
        .collect()
}

fn refresh_auto_label(node: &mut Node) {
    if node.has_custom_label {
        return;
    }
    node.label = if node.text.is_empty() {
        display_name(node.role).to_string()
    } else {
        format_auto_label(&node.text)
    };
}

/// Replace a node's text. A human editing assistant text turns the node
/// into [`NodeRole::EditedAssistant`].
pub fn modify_node_text(nodes: &[Node], id: &NodeId, text: &str, as_human: bool) -> Vec<Node> {
    map_node(nodes, id, |node| {
        node.text = text.to_string();
        if as_human && node.role == NodeRole::Assistant {
            node.role = NodeRole::EditedAssistant;
        }
        refresh_auto_label(node);
    })
}

/// Set a manual label; auto labelling stops for this node.
pub fn modify_node_label(nodes: &[Node], id: &NodeId, label: &str) -> Vec<Node> {
    map_node(nodes, id, |node| {
        node.label = label.to_string();
        node.has_custom_label = true;
    })
}

pub fn set_node_stream(nodes: &[Node], id: &NodeId, stream: Option<StreamEpoch>) -> Vec<Node> {
    map_node(nodes, id, |node| node.stream = stream)
}

/// Clear the stream marker only if `epoch` still owns it.
pub fn release_node_stream(nodes: &[Node], id: &NodeId, epoch: StreamEpoch) -> Vec<Node> {
    map_node(nodes, id, |node| {
        if node.stream == Some(epoch) {
            node.stream = None;
        }
    })
}

/// Empty an assistant node so a new generation can stream into it.
pub fn reset_for_regeneration(nodes: &[Node], id: &NodeId, epoch: StreamEpoch) -> Vec<Node> {
    map_node(nodes, id, |node| {
        node.text.clear();
        node.role = NodeRole::Assistant;
        node.stream = Some(epoch);
    })
}

/// Append generated text to a node owned by `epoch`.
///
/// Fails with [`FluxError::StreamCanceled`] when the marker was cleared and
/// [`FluxError::StreamStale`] when another epoch owns the node; the text is
/// left untouched in both cases.
pub fn append_streamed_text(nodes: &[Node], id: &NodeId, text: &str, epoch: StreamEpoch) -> Result<Vec<Node>> {
    let Some(index) = nodes.iter().position(|n| &n.id == id) else {
        return Ok(nodes.to_vec());
    };

    match nodes[index].stream {
        None => return Err(FluxError::StreamCanceled { node_id: id.clone() }),
        Some(current) if current != epoch => return Err(FluxError::StreamStale { node_id: id.clone() }),
        Some(_) => {}
    }

    let mut out = nodes.to_vec();
    let node = &mut out[index];
    let is_first_token = node.text.is_empty();
    node.text.push_str(text);

    if !node.has_custom_label && (!node.label.ends_with(TRUNCATION_SUFFIX) || is_first_token) {
        node.label = format_auto_label(&node.text);
    }

    Ok(out)
}

pub fn delete_node(nodes: &[Node], id: &NodeId) -> Vec<Node> {
    nodes.iter().filter(|n| &n.id != id).cloned().collect()
}

pub fn delete_selected(nodes: &[Node]) -> Vec<Node> {
    nodes.iter().filter(|n| !n.selected).cloned().collect()
}

/// Flag exactly one node (or none) as selected.
pub fn set_only_selected(nodes: &[Node], id: Option<&NodeId>) -> Vec<Node> {
    nodes
        .iter()
        .map(|node| Node {
            selected: Some(&node.id) == id,
            ..node.clone()
        })
        .collect()
}

pub fn get_node<'a>(nodes: &'a [Node], id: &NodeId) -> Option<&'a Node> {
    nodes.iter().find(|n| &n.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::next_stream_epoch;

    fn node(id: &str, role: NodeRole, text: &str) -> Node {
        new_node(NodeSpec::new(role, text, Position::default()).with_id(id))
    }

    #[test]
    fn test_add_node_appends_and_keeps_original() {
        let before = vec![node("a", NodeRole::User, "hi")];
        let after = add_node(&before, NodeSpec::new(NodeRole::Assistant, "", Position::new(1.0, 2.0)).with_id("b"));
        assert_eq!(before.len(), 1);
        assert_eq!(after.len(), 2);
        assert_eq!(after[1].id, NodeId::from("b"));
        assert_eq!(after[1].label, "Assistant");
        assert_eq!(after[1].position, Position::new(1.0, 2.0));
    }

    #[test]
    fn test_add_node_generates_id_when_missing() {
        let after = add_node(&[], NodeSpec::new(NodeRole::User, "", Position::default()));
        assert!(!after[0].id.as_str().is_empty());
    }

    #[test]
    fn test_root_pair_first_tree_position() {
        let nodes = add_user_node_linked_to_system_node(&[], "sys", "hi", "s".into(), "u".into());
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].role, NodeRole::System);
        assert_eq!(nodes[1].role, NodeRole::User);
        assert_eq!(nodes[0].position, Position::new(FIRST_TREE_X, NEW_TREE_Y));
        assert_eq!(nodes[1].position.x, FIRST_TREE_X);
        let dy = nodes[1].position.y - nodes[0].position.y;
        assert!((CHILD_Y_OFFSET..CHILD_Y_OFFSET + OVERLAP_RANDOMNESS_MAX).contains(&dy));
    }

    #[test]
    fn test_root_pair_placed_right_of_existing() {
        let mut existing = node("x", NodeRole::User, "");
        existing.position = Position::new(250.0, 10.0);
        let nodes = add_user_node_linked_to_system_node(&[existing], "sys", "", "s".into(), "u".into());
        assert_eq!(nodes[1].position.x, 250.0 + NEW_TREE_X_OFFSET);
        assert_eq!(nodes[2].position.x, 250.0 + NEW_TREE_X_OFFSET);
    }

    #[test]
    fn test_human_edit_promotes_assistant() {
        let nodes = vec![node("a", NodeRole::Assistant, "old")];
        let out = modify_node_text(&nodes, &"a".into(), "new text", true);
        assert_eq!(out[0].role, NodeRole::EditedAssistant);
        assert_eq!(out[0].text, "new text");
        assert_eq!(out[0].label, "new text");
        assert_eq!(nodes[0].role, NodeRole::Assistant);
    }

    #[test]
    fn test_machine_edit_keeps_assistant_role() {
        let nodes = vec![node("a", NodeRole::Assistant, "old")];
        let out = modify_node_text(&nodes, &"a".into(), "new", false);
        assert_eq!(out[0].role, NodeRole::Assistant);
    }

    #[test]
    fn test_human_edit_of_user_keeps_role() {
        let nodes = vec![node("u", NodeRole::User, "")];
        let out = modify_node_text(&nodes, &"u".into(), "x", true);
        assert_eq!(out[0].role, NodeRole::User);
    }

    #[test]
    fn test_empty_text_label_falls_back_to_role_name() {
        let nodes = vec![node("a", NodeRole::Assistant, "old")];
        let out = modify_node_text(&nodes, &"a".into(), "", true);
        assert_eq!(out[0].label, "Assistant (edited)");
    }

    #[test]
    fn test_custom_label_survives_text_edit() {
        let nodes = modify_node_label(&[node("u", NodeRole::User, "")], &"u".into(), "Pinned");
        let out = modify_node_text(&nodes, &"u".into(), "something else", true);
        assert_eq!(out[0].label, "Pinned");
        assert!(out[0].has_custom_label);
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let nodes = vec![node("a", NodeRole::User, "hi")];
        assert_eq!(modify_node_text(&nodes, &"zz".into(), "x", true), nodes);
        assert_eq!(delete_node(&nodes, &"zz".into()), nodes);
        let appended = append_streamed_text(&nodes, &"zz".into(), "x", next_stream_epoch()).expect("noop");
        assert_eq!(appended, nodes);
    }

    #[test]
    fn test_append_with_matching_epoch() {
        let epoch = next_stream_epoch();
        let nodes = set_node_stream(&[node("a", NodeRole::Assistant, "")], &"a".into(), Some(epoch));
        let nodes = append_streamed_text(&nodes, &"a".into(), "Hel", epoch).expect("append");
        let nodes = append_streamed_text(&nodes, &"a".into(), "lo", epoch).expect("append");
        assert_eq!(nodes[0].text, "Hello");
        assert_eq!(nodes[0].label, "Hello");
    }

    #[test]
    fn test_append_after_cancel_is_rejected() {
        let epoch = next_stream_epoch();
        let nodes = set_node_stream(&[node("a", NodeRole::Assistant, "part")], &"a".into(), Some(epoch));
        let canceled = set_node_stream(&nodes, &"a".into(), None);
        let err = append_streamed_text(&canceled, &"a".into(), "more", epoch).unwrap_err();
        assert!(matches!(err, FluxError::StreamCanceled { .. }));
        assert_eq!(canceled[0].text, "part");
    }

    #[test]
    fn test_append_from_superseded_epoch_is_stale() {
        let old = next_stream_epoch();
        let new = next_stream_epoch();
        let nodes = set_node_stream(&[node("a", NodeRole::Assistant, "")], &"a".into(), Some(new));
        let err = append_streamed_text(&nodes, &"a".into(), "x", old).unwrap_err();
        assert!(matches!(err, FluxError::StreamStale { .. }));
    }

    #[test]
    fn test_append_freezes_truncated_label() {
        let epoch = next_stream_epoch();
        let nodes = set_node_stream(&[node("a", NodeRole::Assistant, "")], &"a".into(), Some(epoch));
        let nodes = append_streamed_text(&nodes, &"a".into(), "The quick brown fox jumps over the lazy", epoch).expect("append");
        let frozen = nodes[0].label.clone();
        assert!(frozen.ends_with(TRUNCATION_SUFFIX));
        let nodes = append_streamed_text(&nodes, &"a".into(), " dog and more words", epoch).expect("append");
        assert_eq!(nodes[0].label, frozen);
    }

    #[test]
    fn test_release_only_clears_own_epoch() {
        let old = next_stream_epoch();
        let new = next_stream_epoch();
        let nodes = set_node_stream(&[node("a", NodeRole::Assistant, "")], &"a".into(), Some(new));
        let kept = release_node_stream(&nodes, &"a".into(), old);
        assert_eq!(kept[0].stream, Some(new));
        let cleared = release_node_stream(&nodes, &"a".into(), new);
        assert_eq!(cleared[0].stream, None);
    }

    #[test]
    fn test_reset_for_regeneration() {
        let epoch = next_stream_epoch();
        let nodes = vec![node("a", NodeRole::EditedAssistant, "old answer")];
        let out = reset_for_regeneration(&nodes, &"a".into(), epoch);
        assert_eq!(out[0].text, "");
        assert_eq!(out[0].role, NodeRole::Assistant);
        assert_eq!(out[0].stream, Some(epoch));
    }

    #[test]
    fn test_set_only_selected() {
        let nodes = vec![node("a", NodeRole::User, ""), node("b", NodeRole::User, "")];
        let out = set_only_selected(&nodes, Some(&"b".into()));
        assert!(!out[0].selected);
        assert!(out[1].selected);
        let none = set_only_selected(&out, None);
        assert!(none.iter().all(|n| !n.selected));
    }

    #[test]
    fn test_delete_selected_removes_flagged() {
        let nodes = set_only_selected(&[node("a", NodeRole::User, ""), node("b", NodeRole::User, "")], Some(&"a".into()));
        let out = delete_selected(&nodes);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, NodeId::from("b"));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(NodeRole::System.to_string(), "System");
        assert_eq!(NodeRole::EditedAssistant.to_string(), "Assistant (edited)");
        assert!(NodeRole::EditedAssistant.is_assistant());
        assert!(!NodeRole::User.is_assistant());
    }
}
