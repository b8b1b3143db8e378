//! Crate-level error type.
//!
//! Only two variants come out of the synchronous tree transforms:
//! [`FluxError::StreamStale`] and [`FluxError::StreamCanceled`], both raised
//! by the epoch check in [`crate::node::append_streamed_text`]. Everything
//! else originates at the async boundary (provider, store, config).

use thiserror::Error;

use crate::id::NodeId;

#[derive(Debug, Error)]
pub enum FluxError {
    /// The node's stream marker was replaced by a newer generation.
    #[error("stream for node {node_id} was superseded by a newer generation")]
    StreamStale { node_id: NodeId },

    /// The node's stream marker was cleared by the user.
    #[error("stream for node {node_id} was canceled")]
    StreamCanceled { node_id: NodeId },

    /// A completion chunk did not have the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// An action needed a selected node and there was none.
    #[error("no node is selected")]
    NoSelection,

    #[error("no API key: set OPENAI_API_KEY or store one with `key <value>`")]
    MissingApiKey,

    /// The completion endpoint replied with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl FluxError {
    /// Stale and canceled streams are expected outcomes of user actions and
    /// are never shown to the user.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            FluxError::StreamStale { .. } | FluxError::StreamCanceled { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FluxError>;
