use anyhow::{Context, Result, anyhow, bail};
use argus_types::{ChatMessage, Role};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::ChatConfig;

/// One entry of the `messages` array sent to the completion API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: String,
}

impl From<&ChatMessage> for ApiMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

/// A chat-completion service.
pub trait ChatBackend: Send + Sync + 'static {
    /// Waits for the whole reply.
    fn complete(&self, messages: Vec<ApiMessage>) -> impl Future<Output = Result<String>> + Send;

    /// Sends reply fragments into `fragments` in the order they arrive.
    /// Stops with an error if the receiver goes away.
    fn complete_stream(
        &self,
        messages: Vec<ApiMessage>,
        fragments: mpsc::Sender<String>,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Client for an Ollama-compatible `/api/chat` endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    endpoint: String,
    model: String,
    request_timeout: Duration,
    stream_idle: Duration,
}

impl OllamaClient {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/chat", config.ollama_host),
            model: config.model.clone(),
            request_timeout: config.request_timeout,
            stream_idle: config.stream_idle,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, messages: &[ApiMessage], stream: bool) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream,
        };
        let res = timeout(
            self.request_timeout,
            self.http.post(&self.endpoint).json(&body).send(),
        )
        .await
        .map_err(|_| anyhow!("timed out after {:?} waiting for the model", self.request_timeout))?
        .context("send chat request")?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            bail!("chat request failed: {} - {}", status, text.trim());
        }
        Ok(res)
    }
}

impl ChatBackend for OllamaClient {
    async fn complete(&self, messages: Vec<ApiMessage>) -> Result<String> {
        let started = tokio::time::Instant::now();
        let res = self.send(&messages, false).await?;
        let remaining = self.request_timeout.saturating_sub(started.elapsed());
        let bytes = timeout(remaining, res.bytes())
            .await
            .map_err(|_| anyhow!("timed out after {:?} waiting for the model", self.request_timeout))?
            .context("read chat response")?;

        let chunk: ChatChunk = serde_json::from_slice(&bytes).context("decode chat response")?;
        if let Some(err) = chunk.error {
            bail!("model error: {err}");
        }
        let message = chunk
            .message
            .ok_or_else(|| anyhow!("chat response has no message"))?;
        Ok(message.content)
    }

    async fn complete_stream(
        &self,
        messages: Vec<ApiMessage>,
        fragments: mpsc::Sender<String>,
    ) -> Result<()> {
        let mut res = self.send(&messages, true).await?;
        let mut decoder = NdjsonDecoder::default();

        loop {
            let chunk = timeout(self.stream_idle, res.chunk())
                .await
                .map_err(|_| anyhow!("model stream stalled for {:?}", self.stream_idle))?
                .context("read chat stream")?;
            let Some(bytes) = chunk else {
                break;
            };
            for line in decoder.push(&bytes) {
                if forward_line(&line, &fragments).await? {
                    return Ok(());
                }
            }
        }

        if let Some(line) = decoder.finish() {
            if forward_line(&line, &fragments).await? {
                return Ok(());
            }
        }
        bail!("model stream ended before the reply was complete")
    }
}

/// Returns whether the chunk marks the end of the reply.
async fn forward_line(line: &str, fragments: &mpsc::Sender<String>) -> Result<bool> {
    let chunk: ChatChunk =
        serde_json::from_str(line).with_context(|| format!("decode stream chunk {line:?}"))?;
    if let Some(err) = chunk.error {
        bail!("model error: {err}");
    }
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            fragments
                .send(message.content)
                .await
                .map_err(|_| anyhow!("reply cancelled before completion"))?;
        }
    }
    Ok(chunk.done)
}

/// Splits a byte stream into newline-terminated lines across chunk boundaries.
#[derive(Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the stream ends.
    pub fn finish(self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.buf).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}
