//! Streaming client for Ollama's `/api/chat` endpoint.
//!
//! Behaviour:
//! - `POST /api/chat` with `stream: true` and the full conversation history.
//! - The response body is newline-delimited JSON, one chunk per line:
//!   `{"message":{"role":"assistant","content":"..."},"done":false}`.
//! - A chunk carrying `"error"` ends the stream with an error.
//! - The stream ends after the chunk with `"done": true`, or at end of body.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::config::LlmConfig;
use crate::core::errors::{ChatError, ChatResult};
use crate::llm::{ChatModel, FragmentStream, ModelFuture};
use crate::store::message::HistoryEntry;

/// Connection timeout. Generation itself is not bounded.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Whole-request bound for the readiness check.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [HistoryEntry],
    stream: bool,
    keep_alive: &'a str,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

/// One decoded stream line.
#[derive(Debug, Eq, PartialEq)]
struct ChunkText {
    content: String,
    done: bool,
}

/// Async Ollama client producing reply fragments as they are generated.
#[derive(Clone)]
pub struct OllamaChatClient {
    client: Client,
    base_url: String,
    keep_alive: String,
    ready_timeout: Duration,
}

impl OllamaChatClient {
    /// Create a client for the configured Ollama server.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> ChatResult<Self> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            keep_alive: config.keep_alive.clone(),
            ready_timeout: READY_TIMEOUT,
        })
    }

    /// Check whether Ollama answers `GET /api/version`.
    ///
    /// # Errors
    /// Returns an error if the server cannot be reached or does not answer in time.
    pub async fn is_ready(&self) -> ChatResult<bool> {
        let url = format!("{}/api/version", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.ready_timeout)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn post_chat(&self, model: &str, messages: &[HistoryEntry]) -> ChatResult<FragmentStream> {
        let request = ChatRequest {
            model,
            messages,
            stream: true,
            keep_alive: &self.keep_alive,
        };

        let url = format!("{}/api/chat", self.base_url);
        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::HttpStatusNotOk {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("Streaming reply from {model}");
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(fragments_from_bytes(bytes))
    }
}

impl ChatModel for OllamaChatClient {
    fn stream_chat<'a>(
        &'a self,
        model: &'a str,
        messages: Vec<HistoryEntry>,
    ) -> ModelFuture<'a, ChatResult<FragmentStream>> {
        Box::pin(async move { self.post_chat(model, &messages).await })
    }
}

/// Splits a byte stream into lines, tolerating lines split across reads.
#[derive(Debug, Default)]
struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }

    /// Whatever is left once the body has ended.
    fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

fn parse_chat_chunk(line: &str) -> ChatResult<Option<ChunkText>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let chunk: ChatChunk = serde_json::from_str(line)?;
    if let Some(error) = chunk.error {
        return Err(ChatError::Inference(error));
    }

    Ok(Some(ChunkText {
        content: chunk.message.map(|m| m.content).unwrap_or_default(),
        done: chunk.done,
    }))
}

struct ReplyState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: NdjsonDecoder,
    eof: bool,
    finished: bool,
}

impl ReplyState {
    async fn next_line(&mut self) -> ChatResult<Option<String>> {
        loop {
            if let Some(line) = self.decoder.next_line() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(self.decoder.finish());
            }
            match self.bytes.next().await {
                Some(chunk) => self.decoder.push(&chunk?),
                None => self.eof = true,
            }
        }
    }

    async fn next_fragment(&mut self) -> Option<ChatResult<String>> {
        while !self.finished {
            let parsed = match self.next_line().await {
                Ok(Some(line)) => parse_chat_chunk(&line),
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(err) => Err(err),
            };

            match parsed {
                Ok(Some(chunk)) => {
                    self.finished = chunk.done;
                    if !chunk.content.is_empty() {
                        return Some(Ok(chunk.content));
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

fn fragments_from_bytes(
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
) -> FragmentStream {
    let state = ReplyState {
        bytes,
        decoder: NdjsonDecoder::default(),
        eof: false,
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        state.next_fragment().await.map(|item| (item, state))
    })
    .boxed()
}
