//! Node identifiers and stream epochs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a node in the conversation tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// Generate a fresh random node id.
pub fn generate_node_id() -> NodeId {
    NodeId(uuid::Uuid::new_v4().to_string())
}

/// Token tying streamed text to one generation request.
///
/// A node accepts appends only while its marker equals the epoch the
/// appending task was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamEpoch(u64);

impl StreamEpoch {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StreamEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Mint an epoch that no earlier call in this process has returned.
pub fn next_stream_epoch() -> StreamEpoch {
    StreamEpoch(NEXT_EPOCH.fetch_add(1, Ordering::Relaxed))
}
