//! flux-tree: branching LLM conversations as a tree.
//!
//! Nodes and edges form a forest; a node's conversation is its lineage
//! back to the root. Generations stream several model responses into
//! sibling nodes at once, guarded by per-request epochs so a canceled or
//! superseded stream can never write into a node it no longer owns. Every
//! structural change goes through [`session::Session`], which snapshots
//! into a bounded undo/redo history first.

pub mod cli;
pub mod config;
pub mod edge;
pub mod error;
pub mod generation;
pub mod history;
pub mod id;
pub mod label;
pub mod launch;
pub mod lineage;
pub mod node;
pub mod prompt;
pub mod providers;
pub mod repl;
pub mod session;
pub mod settings;
pub mod store;

pub use error::{FluxError, Result};
pub use id::{NodeId, StreamEpoch};
pub use session::Session;
