//! Streaming model output into a session.
//!
//! ## Design
//! - The session is shared as `Arc<Mutex<Session>>`; the lock is taken for
//!   one synchronous transform at a time and never held across an await
//! - Every append is checked against the plan's epoch, so a canceled or
//!   superseded generation stops at its next chunk
//! - Errors are sorted at this boundary: stale/canceled are silent
//!   outcomes, malformed chunks become one user notice, transport failures
//!   are returned
//!
//! ## Chunk shape
//! `{"choices":[{"index":0,"delta":{"content":"..."},"finish_reason":null}]}`

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::sync::{Arc, Mutex};

use crate::error::{FluxError, Result};
use crate::id::NodeId;
use crate::providers::{ChatCompletionRequest, OpenAiClient};
use crate::session::{GenerationPlan, Session};

#[derive(Debug, Deserialize)]
struct ChunkBody {
    choices: Option<Vec<ChoiceBody>>,
}

#[derive(Debug, Deserialize)]
struct ChoiceBody {
    index: Option<usize>,
    #[serde(default)]
    delta: Option<DeltaBody>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeltaBody {
    #[serde(default)]
    content: Option<String>,
}

/// One choice entry of a decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceDelta {
    pub index: usize,
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

/// Decode one chunk payload.
pub fn decode_chunk(payload: &str) -> Result<Vec<ChoiceDelta>> {
    let body: ChunkBody = serde_json::from_str(payload)
        .map_err(|e| FluxError::MalformedResponse(format!("undecodable chunk ({e}): {payload}")))?;

    let choices = body
        .choices
        .ok_or_else(|| FluxError::MalformedResponse(format!("no choices in response: {payload}")))?;

    choices
        .into_iter()
        .map(|choice| {
            let index = choice
                .index
                .ok_or_else(|| FluxError::MalformedResponse(format!("no index in choice: {payload}")))?;
            Ok(ChoiceDelta {
                index,
                content: choice.delta.and_then(|d| d.content),
                finish_reason: choice.finish_reason,
            })
        })
        .collect()
}

/// How a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The stream ran to its end.
    Completed,
    /// A target's marker was cleared by the user.
    Canceled,
    /// A newer generation took over a target.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub outcome: GenerationOutcome,
    pub chunks_applied: usize,
    pub malformed_chunks: usize,
    /// First malformed-chunk error, shown to the user once.
    pub first_error: Option<String>,
}

impl GenerationReport {
    /// Text for a user-visible notification, if any.
    pub fn user_notice(&self) -> Option<&str> {
        self.first_error.as_deref()
    }
}

fn with_session<T>(session: &Arc<Mutex<Session>>, f: impl FnOnce(&mut Session) -> T) -> Result<T> {
    let mut guard = session
        .lock()
        .map_err(|_| FluxError::Config("internal: session lock poisoned".to_string()))?;
    Ok(f(&mut guard))
}

fn release_all(session: &Arc<Mutex<Session>>, plan: &GenerationPlan) -> Result<()> {
    with_session(session, |s| {
        for target in &plan.targets {
            s.finish_stream(&plan.parent_id, target, plan.epoch);
        }
    })
}

enum Step {
    Continue,
    Abort(GenerationOutcome),
}

fn apply_choice(session: &Arc<Mutex<Session>>, plan: &GenerationPlan, choice: &ChoiceDelta) -> Result<Step> {
    let target: NodeId = plan
        .target(choice.index)
        .cloned()
        .ok_or_else(|| FluxError::MalformedResponse(format!("choice index {} out of range", choice.index)))?;

    // The first delta of a chat stream carries only the role.
    if let Some(content) = choice.content.as_deref().filter(|c| !c.is_empty()) {
        let applied = with_session(session, |s| s.apply_stream_delta(&target, content, plan.epoch))?;
        match applied {
            Ok(()) => {}
            Err(FluxError::StreamCanceled { node_id }) => {
                tracing::debug!(node = %node_id, epoch = %plan.epoch, "generation canceled");
                return Ok(Step::Abort(GenerationOutcome::Canceled));
            }
            Err(FluxError::StreamStale { node_id }) => {
                tracing::debug!(node = %node_id, epoch = %plan.epoch, "generation superseded");
                return Ok(Step::Abort(GenerationOutcome::Superseded));
            }
            Err(other) => return Err(other),
        }
    }

    if choice.finish_reason.is_some() {
        with_session(session, |s| s.finish_stream(&plan.parent_id, &target, plan.epoch))?;
    }

    Ok(Step::Continue)
}

/// Drive one generation to completion.
///
/// Chunks are applied strictly in arrival order. Malformed chunks are
/// logged and skipped. However the loop ends, every target still owned by
/// the plan's epoch (or already canceled) is released; targets a newer
/// generation has taken over keep its marker. A transport error releases
/// the targets and is returned.
pub async fn run_generation<S>(session: Arc<Mutex<Session>>, plan: GenerationPlan, chunks: S) -> Result<GenerationReport>
where
    S: Stream<Item = Result<String>>,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut report = GenerationReport {
        outcome: GenerationOutcome::Completed,
        chunks_applied: 0,
        malformed_chunks: 0,
        first_error: None,
    };

    'stream: while let Some(item) = chunks.next().await {
        let payload = match item {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(epoch = %plan.epoch, error = %e, "completion stream failed");
                release_all(&session, &plan)?;
                return Err(e);
            }
        };

        let choices = match decode_chunk(&payload) {
            Ok(choices) => choices,
            Err(e) => {
                tracing::warn!(epoch = %plan.epoch, error = %e, "skipping malformed chunk");
                report.malformed_chunks += 1;
                report.first_error.get_or_insert_with(|| e.to_string());
                continue;
            }
        };

        for choice in &choices {
            match apply_choice(&session, &plan, choice) {
                Ok(Step::Continue) => {}
                Ok(Step::Abort(outcome)) => {
                    report.outcome = outcome;
                    break 'stream;
                }
                Err(e @ FluxError::MalformedResponse(_)) => {
                    tracing::warn!(epoch = %plan.epoch, error = %e, "skipping malformed choice");
                    report.malformed_chunks += 1;
                    report.first_error.get_or_insert_with(|| e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        report.chunks_applied += 1;
    }

    // Targets taken over by a newer epoch are skipped by the release.
    release_all(&session, &plan)?;

    tracing::info!(
        epoch = %plan.epoch,
        outcome = ?report.outcome,
        chunks = report.chunks_applied,
        malformed = report.malformed_chunks,
        "generation finished"
    );
    Ok(report)
}

/// Request a completion for `plan` and stream it into the session.
///
/// If the request itself fails the plan's targets are released before the
/// error is returned.
pub async fn generate(client: &OpenAiClient, session: Arc<Mutex<Session>>, plan: GenerationPlan) -> Result<GenerationReport> {
    let request = ChatCompletionRequest::from_plan(&plan);
    match client.stream_chat(&request).await {
        Ok(chunks) => run_generation(session, plan, chunks).await,
        Err(e) => {
            tracing::error!(epoch = %plan.epoch, error = %e, "completion request failed");
            release_all(&session, &plan)?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_content_chunk() {
        let out = decode_chunk(r#"{"choices":[{"index":1,"delta":{"content":"Hi"},"finish_reason":null}]}"#)
            .expect("decode");
        assert_eq!(
            out,
            vec![ChoiceDelta { index: 1, content: Some("Hi".into()), finish_reason: None }]
        );
    }

    #[test]
    fn test_decode_role_only_delta() {
        let out = decode_chunk(r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#).expect("decode");
        assert_eq!(out[0].content, None);
    }

    #[test]
    fn test_decode_finish() {
        let out = decode_chunk(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#).expect("decode");
        assert_eq!(out[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_decode_empty_choices_is_ok() {
        assert!(decode_chunk(r#"{"choices":[]}"#).expect("decode").is_empty());
    }

    #[test]
    fn test_decode_missing_choices() {
        let err = decode_chunk(r#"{"error":"x"}"#).unwrap_err();
        assert!(matches!(err, FluxError::MalformedResponse(ref m) if m.contains("no choices")));
    }

    #[test]
    fn test_decode_missing_index() {
        let err = decode_chunk(r#"{"choices":[{"delta":{"content":"x"}}]}"#).unwrap_err();
        assert!(matches!(err, FluxError::MalformedResponse(ref m) if m.contains("no index")));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode_chunk("not json"), Err(FluxError::MalformedResponse(_))));
    }

    #[test]
    fn test_user_notice_only_for_errors() {
        let report = GenerationReport {
            outcome: GenerationOutcome::Canceled,
            chunks_applied: 0,
            malformed_chunks: 0,
            first_error: None,
        };
        assert_eq!(report.user_notice(), None);
    }
}
