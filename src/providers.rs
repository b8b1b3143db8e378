//! OpenAI-compatible chat-completions client.
//!
//! The rest of the crate only sees an ordered stream of JSON chunk payloads
//! (`Stream<Item = Result<String, FluxError>>`); SSE framing and HTTP stay
//! in this module.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::{FluxError, Result};
use crate::prompt::ChatMessage;
use crate::session::GenerationPlan;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Chunks buffered between the HTTP reader task and the consumer.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

// -- Request / response types ------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub n: u32,
    pub temperature: f32,
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn from_plan(plan: &GenerationPlan) -> Self {
        Self {
            model: plan.model.clone(),
            messages: plan.messages.clone(),
            n: plan.targets.len() as u32,
            temperature: plan.temperature,
            stream: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

// -- SSE framing -------------------------------------------------------------

/// Splits a byte stream into SSE `data:` payloads.
///
/// Bytes are held until a full line arrives, so a UTF-8 sequence split
/// across network reads is decoded whole.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text; see [`SseBuffer::push_bytes`].
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.push_bytes(chunk.as_bytes())
    }

    /// Feed raw bytes; returns every complete `data:` payload, skipping the
    /// `[DONE]` sentinel, blank lines and comments.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if data != "[DONE]" && !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }

        payloads
    }
}

// -- Client ------------------------------------------------------------------

#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Start a streaming chat completion.
    ///
    /// The HTTP body is read on a spawned task; chunk payloads arrive on the
    /// returned stream in order. A transport failure mid-stream is delivered
    /// as a final `Err` item.
    pub async fn stream_chat(&self, request: &ChatCompletionRequest) -> Result<ReceiverStream<Result<String>>> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            return Err(FluxError::Http { status, body });
        }

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let mut bytes = response.bytes_stream();

        tokio::spawn(async move {
            let mut sse = SseBuffer::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for payload in sse.push_bytes(&chunk) {
                            if tx.send(Ok(payload)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(FluxError::Request(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Chat-capable model ids (`gpt-*`), sorted.
    pub async fn list_chat_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/models", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            return Err(FluxError::Http { status, body });
        }

        let list: ModelList = response.json().await?;
        Ok(chat_model_ids(list.data.into_iter().map(|m| m.id)))
    }
}

fn chat_model_ids(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut models: Vec<String> = ids.filter(|id| id.starts_with("gpt-")).collect();
    models.sort();
    models
}
