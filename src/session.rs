//! The conversation session: graph state, selection, history and settings
//! behind one reducer-style API.
//!
//! ## Responsibility
//! Every user-level action (new tree, new child, connect, edit, delete,
//! generate, undo, navigate) is a method here. Each method that changes the
//! nodes or edges snapshots the pre-mutation state into [`History`] first,
//! then replaces the collections with the output of the pure transforms in
//! [`crate::node`], [`crate::edge`] and [`crate::lineage`].
//!
//! ## NOT Responsible For
//! - Talking to the model (see [`crate::generation`])
//! - Writing to disk (see [`crate::store`])
//! - Rendering

use serde::{Deserialize, Serialize};

use crate::edge::{
    add_edge, prune_dangling_edges, reconnect_edge, remove_edge, set_edge_animated, Edge,
};
use crate::error::{FluxError, Result};
use crate::history::{History, HistoryItem};
use crate::id::{generate_node_id, next_stream_epoch, NodeId, StreamEpoch};
use crate::lineage::{
    get_assistant_children, get_children, get_lineage, get_parent, get_siblings, is_connection_allowed,
};
use crate::node::{
    add_node, add_user_node_linked_to_system_node, append_streamed_text, delete_node, delete_selected,
    get_node, modify_node_label, modify_node_text, new_node, overlap_jitter, release_node_stream,
    reset_for_regeneration, set_node_stream, set_only_selected, Node, NodeRole, NodeSpec, Position,
    CHILD_Y_OFFSET,
};
use crate::prompt::{messages_from_lineage, ChatMessage};
use crate::settings::Settings;

/// Horizontal distance between sibling nodes.
pub const SIBLING_X_SPACING: f64 = 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

/// Persisted form of the graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphState {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub selected_node_id: Option<NodeId>,
    pub last_selected_node_id: Option<NodeId>,
    pub viewport: Viewport,
}

/// What a started generation streams into.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub epoch: StreamEpoch,
    pub parent_id: NodeId,
    /// Target node for choice `i` is `targets[i]`.
    pub targets: Vec<NodeId>,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
}

impl GenerationPlan {
    pub fn target(&self, choice_index: usize) -> Option<&NodeId> {
        self.targets.get(choice_index)
    }
}

pub struct Session {
    graph: GraphState,
    history: History<HistoryItem>,
    settings: Settings,
}

impl Session {
    pub fn new(settings: Settings, history_size: usize) -> Self {
        Self {
            graph: GraphState::default(),
            history: History::new(history_size),
            settings,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn graph(&self) -> &GraphState {
        &self.graph
    }

    pub fn nodes(&self) -> &[Node] {
        &self.graph.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.graph.edges
    }

    pub fn selected_node_id(&self) -> Option<&NodeId> {
        self.graph.selected_node_id.as_ref()
    }

    pub fn selected_node(&self) -> Option<&Node> {
        get_node(&self.graph.nodes, self.graph.selected_node_id.as_ref()?)
    }

    pub fn selected_lineage(&self) -> Vec<&Node> {
        match &self.graph.selected_node_id {
            Some(id) => get_lineage(&self.graph.nodes, &self.graph.edges, id),
            None => Vec::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings.sanitized();
    }

    pub fn history(&self) -> &History<HistoryItem> {
        &self.history
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    fn history_item(&self) -> HistoryItem {
        HistoryItem {
            nodes: self.graph.nodes.clone(),
            edges: self.graph.edges.clone(),
            selected_node_id: self.graph.selected_node_id.clone(),
            last_selected_node_id: self.graph.last_selected_node_id.clone(),
        }
    }

    fn apply_history_item(&mut self, item: HistoryItem) {
        self.graph.nodes = item.nodes;
        self.graph.edges = item.edges;
        self.graph.selected_node_id = item.selected_node_id;
        self.graph.last_selected_node_id = item.last_selected_node_id;
    }

    /// Record the current state so the next mutation can be undone.
    pub fn snapshot(&mut self) {
        let item = self.history_item();
        self.history.snapshot(item);
    }

    pub fn undo(&mut self) -> bool {
        let current = self.history_item();
        match self.history.undo(current) {
            Some(previous) => {
                self.apply_history_item(previous);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        let current = self.history_item();
        match self.history.redo(current) {
            Some(next) => {
                self.apply_history_item(next);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Selection and navigation (no snapshots)
    // -----------------------------------------------------------------------

    pub fn select_node(&mut self, id: &NodeId) {
        self.graph.last_selected_node_id = self.graph.selected_node_id.take();
        self.graph.selected_node_id = Some(id.clone());
        self.graph.nodes = set_only_selected(&self.graph.nodes, Some(id));
    }

    fn clear_selection(&mut self) {
        self.graph.selected_node_id = None;
        self.graph.last_selected_node_id = None;
        self.graph.nodes = set_only_selected(&self.graph.nodes, None);
    }

    pub fn move_to_parent(&mut self) -> bool {
        let Some(selected) = self.graph.selected_node_id.clone() else {
            return false;
        };
        let Some(parent) = get_parent(&self.graph.nodes, &self.graph.edges, &selected).map(|p| p.id.clone()) else {
            return false;
        };
        self.select_node(&parent);
        true
    }

    /// Move down, preferring the child we last came up from.
    pub fn move_to_child(&mut self) -> bool {
        let Some(selected) = self.graph.selected_node_id.clone() else {
            return false;
        };
        let children: Vec<NodeId> = get_children(&self.graph.nodes, &self.graph.edges, &selected)
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        let target = match &self.graph.last_selected_node_id {
            Some(last) if children.contains(last) => last.clone(),
            _ => match children.first() {
                Some(first) => first.clone(),
                None => return false,
            },
        };
        self.select_node(&target);
        true
    }

    fn move_to_sibling(&mut self, step: isize) -> bool {
        let Some(selected) = self.graph.selected_node_id.clone() else {
            return false;
        };
        let siblings: Vec<NodeId> = get_siblings(&self.graph.nodes, &self.graph.edges, &selected)
            .into_iter()
            .map(|s| s.id.clone())
            .collect();
        if siblings.len() < 2 {
            return false;
        }
        let Some(current) = siblings.iter().position(|s| s == &selected) else {
            return false;
        };
        let len = siblings.len() as isize;
        let next = (current as isize + step).rem_euclid(len) as usize;
        self.select_node(&siblings[next]);
        true
    }

    pub fn move_to_left_sibling(&mut self) -> bool {
        self.move_to_sibling(-1)
    }

    pub fn move_to_right_sibling(&mut self) -> bool {
        self.move_to_sibling(1)
    }

    // -----------------------------------------------------------------------
    // Structural mutations
    // -----------------------------------------------------------------------

    fn label_new_text(&mut self, id: &NodeId, text: &str) {
        if !text.is_empty() {
            self.graph.nodes = modify_node_text(&self.graph.nodes, id, text, false);
        }
    }

    /// Start a new conversation: System (default preamble) → User. Selects
    /// and returns the user node.
    pub fn new_tree(&mut self, user_text: Option<&str>) -> NodeId {
        self.snapshot();

        let system_id = generate_node_id();
        let user_id = generate_node_id();
        let user_text = user_text.unwrap_or("");

        self.graph.nodes = add_user_node_linked_to_system_node(
            &self.graph.nodes,
            &self.settings.default_preamble,
            user_text,
            system_id.clone(),
            user_id.clone(),
        );
        self.label_new_text(&user_id, user_text);
        self.graph.edges = add_edge(&self.graph.edges, system_id, user_id.clone(), false);
        self.select_node(&user_id);

        tracing::debug!(user = %user_id, "new conversation tree");
        user_id
    }

    /// Add a child of `role` under the selected node and select it.
    pub fn new_connected_to_selected(&mut self, role: NodeRole, text: &str) -> Option<NodeId> {
        let selected = self.selected_node()?.clone();
        self.snapshot();

        let rightmost_child = get_children(&self.graph.nodes, &self.graph.edges, &selected.id)
            .iter()
            .map(|c| c.position.x)
            .reduce(f64::max);
        let x = match rightmost_child {
            Some(max_x) => max_x + SIBLING_X_SPACING,
            None => selected.position.x,
        };
        let y = selected.position.y + CHILD_Y_OFFSET + overlap_jitter();

        let id = generate_node_id();
        self.graph.nodes = add_node(
            &self.graph.nodes,
            NodeSpec::new(role, text, Position::new(x, y)).with_id(id.clone()),
        );
        self.label_new_text(&id, text);
        self.graph.edges = add_edge(&self.graph.edges, selected.id, id.clone(), false);
        self.select_node(&id);
        Some(id)
    }

    /// Link `source → target` if it keeps the graph a forest.
    pub fn connect(&mut self, source: &NodeId, target: &NodeId) -> bool {
        if get_node(&self.graph.nodes, source).is_none() || get_node(&self.graph.nodes, target).is_none() {
            return false;
        }
        if !is_connection_allowed(&self.graph.nodes, &self.graph.edges, source, target) {
            return false;
        }
        self.snapshot();
        self.graph.edges = add_edge(&self.graph.edges, source.clone(), target.clone(), false);
        true
    }

    /// Move an existing edge to new endpoints.
    pub fn reconnect(&mut self, edge_id: &str, source: &NodeId, target: &NodeId) -> bool {
        if !self.graph.edges.iter().any(|e| e.id == edge_id) {
            return false;
        }
        // The edge being moved does not count against its own new endpoints.
        let others = remove_edge(&self.graph.edges, edge_id);
        if !is_connection_allowed(&self.graph.nodes, &others, source, target) {
            return false;
        }
        self.snapshot();
        self.graph.edges = reconnect_edge(&self.graph.edges, edge_id, source.clone(), target.clone());
        true
    }

    pub fn disconnect(&mut self, edge_id: &str) -> bool {
        if !self.graph.edges.iter().any(|e| e.id == edge_id) {
            return false;
        }
        self.snapshot();
        self.graph.edges = remove_edge(&self.graph.edges, edge_id);
        true
    }

    /// Human edit of a node's text.
    pub fn edit_text(&mut self, id: &NodeId, text: &str) -> bool {
        if get_node(&self.graph.nodes, id).is_none() {
            return false;
        }
        self.snapshot();
        self.graph.nodes = modify_node_text(&self.graph.nodes, id, text, true);
        true
    }

    pub fn rename(&mut self, id: &NodeId, label: &str) -> bool {
        if get_node(&self.graph.nodes, id).is_none() {
            return false;
        }
        self.snapshot();
        self.graph.nodes = modify_node_label(&self.graph.nodes, id, label);
        true
    }

    /// Delete the selection and keep a sensible node selected.
    ///
    /// When the session's selected node is the only thing selected, the
    /// selection moves to the right sibling, else to the parent, else is
    /// cleared. When other nodes are flagged they are all removed.
    pub fn delete_selected(&mut self) {
        self.snapshot();
        self.remove_selection();
    }

    fn remove_selection(&mut self) {
        let flagged: Vec<NodeId> = self
            .graph
            .nodes
            .iter()
            .filter(|n| n.selected)
            .map(|n| n.id.clone())
            .collect();

        match self.graph.selected_node_id.clone() {
            Some(selected) if flagged.is_empty() || (flagged.len() == 1 && flagged[0] == selected) => {
                if !self.move_to_right_sibling() && !self.move_to_parent() {
                    self.clear_selection();
                }
                self.graph.nodes = delete_node(&self.graph.nodes, &selected);
            }
            selected => {
                self.graph.nodes = delete_selected(&self.graph.nodes);
                if selected.is_some_and(|s| flagged.contains(&s)) {
                    self.clear_selection();
                }
            }
        }

        self.graph.edges = prune_dangling_edges(&self.graph.nodes, &self.graph.edges);
    }

    /// Delete one node by id, pruning its edges.
    pub fn delete(&mut self, id: &NodeId) -> bool {
        if get_node(&self.graph.nodes, id).is_none() {
            return false;
        }
        if self.graph.selected_node_id.as_ref() == Some(id) {
            self.snapshot();
            self.graph.nodes = set_only_selected(&self.graph.nodes, Some(id));
            self.remove_selection();
            return true;
        }
        self.snapshot();
        self.graph.nodes = delete_node(&self.graph.nodes, id);
        self.graph.edges = prune_dangling_edges(&self.graph.nodes, &self.graph.edges);
        true
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.snapshot();
        self.graph.nodes.clear();
        self.graph.edges.clear();
        self.clear_selection();
        self.graph.viewport = Viewport::default();
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Prepare `settings.n` assistant children of the selected node to
    /// receive a new generation.
    ///
    /// With `override_existing`, the first existing assistant children are
    /// emptied and reused; any further responses get fresh nodes. All
    /// targets share one new epoch. The first target becomes selected.
    pub fn begin_generation(&mut self, override_existing: bool) -> Result<GenerationPlan> {
        let parent = self.selected_node().cloned().ok_or(FluxError::NoSelection)?;
        self.snapshot();

        let messages = {
            let lineage = get_lineage(&self.graph.nodes, &self.graph.edges, &parent.id);
            messages_from_lineage(&lineage, &self.settings)
        };
        let existing: Vec<Node> = get_assistant_children(&self.graph.nodes, &self.graph.edges, &parent.id)
            .into_iter()
            .cloned()
            .collect();
        let rightmost = existing.iter().map(|c| c.position.x).reduce(f64::max);

        let responses = self.settings.n.max(1) as usize;
        let epoch = next_stream_epoch();
        let mut nodes = self.graph.nodes.clone();
        let mut edges = self.graph.edges.clone();
        let mut targets = Vec::with_capacity(responses);

        for i in 0..responses {
            if override_existing && i < existing.len() {
                let child = &existing[i].id;
                nodes = reset_for_regeneration(&nodes, child, epoch);
                edges = set_edge_animated(&edges, &parent.id, child, true);
                targets.push(child.clone());
            } else {
                let x = fan_out_x(parent.position.x, rightmost, i, responses);
                let y = parent.position.y + CHILD_Y_OFFSET + overlap_jitter();
                let node = new_node(NodeSpec::new(NodeRole::Assistant, "", Position::new(x, y)).with_stream(epoch));
                let id = node.id.clone();
                nodes.push(node);
                edges = add_edge(&edges, parent.id.clone(), id.clone(), true);
                targets.push(id);
            }
        }

        self.graph.nodes = nodes;
        self.graph.edges = edges;
        self.select_node(&targets[0]);

        tracing::info!(%epoch, parent = %parent.id, responses, override_existing, "generation started");

        Ok(GenerationPlan {
            epoch,
            parent_id: parent.id,
            targets,
            messages,
            model: self.settings.model.clone(),
            temperature: self.settings.temp,
        })
    }

    /// Append streamed text to a target of `epoch`.
    pub fn apply_stream_delta(&mut self, id: &NodeId, text: &str, epoch: StreamEpoch) -> Result<()> {
        self.graph.nodes = append_streamed_text(&self.graph.nodes, id, text, epoch)?;
        Ok(())
    }

    /// Release a finished target: clear its marker and stop its edge
    /// animation, unless a newer epoch has taken the node over.
    pub fn finish_stream(&mut self, parent: &NodeId, id: &NodeId, epoch: StreamEpoch) {
        let owned_elsewhere = get_node(&self.graph.nodes, id)
            .and_then(|n| n.stream)
            .is_some_and(|current| current != epoch);
        if owned_elsewhere {
            return;
        }
        self.graph.nodes = release_node_stream(&self.graph.nodes, id, epoch);
        self.graph.edges = set_edge_animated(&self.graph.edges, parent, id, false);
    }

    /// User cancellation: clear the node's marker so the owning task stops
    /// at its next append. Returns false if nothing was streaming.
    pub fn cancel_stream(&mut self, id: &NodeId) -> bool {
        match get_node(&self.graph.nodes, id) {
            Some(node) if node.stream.is_some() => {
                self.graph.nodes = set_node_stream(&self.graph.nodes, id, None);
                tracing::debug!(node = %id, "stream canceled");
                true
            }
            _ => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.graph.nodes.iter().any(|n| n.stream.is_some())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn to_flow(&self) -> FlowSnapshot {
        FlowSnapshot {
            nodes: self.graph.nodes.clone(),
            edges: self.graph.edges.clone(),
            viewport: self.graph.viewport,
        }
    }

    /// Load a persisted flow at startup.
    ///
    /// Selects the first flagged node (or the first node). A `new_tree_with`
    /// seed starts a new tree with that text as the user message; an empty
    /// or missing flow always starts one. Stream markers left over from a
    /// previous process are dropped, since no task owns them.
    pub fn restore(&mut self, flow: Option<FlowSnapshot>, new_tree_with: Option<&str>) {
        if let Some(flow) = flow {
            self.graph.edges = flow
                .edges
                .into_iter()
                .map(|e| Edge { animated: false, ..e })
                .collect();
            self.graph.viewport = flow.viewport;

            if !flow.nodes.is_empty() {
                let to_select = flow
                    .nodes
                    .iter()
                    .find(|n| n.selected)
                    .unwrap_or(&flow.nodes[0])
                    .id
                    .clone();
                self.graph.nodes = flow
                    .nodes
                    .into_iter()
                    .map(|n| Node { stream: None, ..n })
                    .collect();
                self.select_node(&to_select);
                tracing::info!(nodes = self.graph.nodes.len(), edges = self.graph.edges.len(), "restored flow");

                if let Some(content) = new_tree_with {
                    self.new_tree(Some(content));
                }
                return;
            }
        }

        self.new_tree(new_tree_with);
    }
}

/// x for the `i`-th of `responses` new children, centred under the parent
/// or, when children exist already, placed to the right of the rightmost.
pub fn fan_out_x(parent_x: f64, rightmost_child_x: Option<f64>, i: usize, responses: usize) -> f64 {
    let n = responses as f64;
    let base = match rightmost_child_x {
        Some(max_x) => max_x + (n / 2.0) * SIBLING_X_SPACING + SIBLING_X_SPACING / 2.0,
        None => parent_x,
    };
    base + (i as f64 - (n - 1.0) / 2.0) * SIBLING_X_SPACING
}
