//! Streaming client for the text generation service
//!
//! The service answers `POST /api/generate` with newline-delimited JSON
//! records. Each record may carry a `response` fragment; the last one has
//! `done: true`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::{Error, Result};

/// Longest slice of an undecodable line quoted in errors
const MAX_QUOTED_LINE: usize = 120;

/// One decoded unit of the generation stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    /// Text fragment, possibly empty
    pub text: String,

    /// Whether this record completes the stream
    pub done: bool,
}

/// An in-flight generation stream
///
/// Yields events in arrival order. After the completion record, or after the
/// first error, it yields `None`.
#[async_trait]
pub trait EventStream: Send {
    /// Next event, `None` once the stream is over
    async fn next_event(&mut self) -> Option<Result<TokenEvent>>;
}

/// Something that turns a prompt into a stream of token events
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Open a new stream for `prompt`
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started
    async fn stream(&self, prompt: &str) -> Result<Box<dyn EventStream>>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateRecord {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the generation service
pub struct GenerationClient {
    client: reqwest::Client,
    url: String,
    model: String,
    system: Option<String>,
}

impl GenerationClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            system: config.system.clone(),
        })
    }
}

#[async_trait]
impl TokenSource for GenerationClient {
    async fn stream(&self, prompt: &str) -> Result<Box<dyn EventStream>> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            system: self.system.as_deref(),
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %self.url, "generation request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "generation service error");
            return Err(Error::Generation(format!("service returned {status}: {body}")));
        }

        tracing::debug!(model = %self.model, "generation stream opened");
        Ok(Box::new(NdjsonStream::new(Box::pin(response.bytes_stream()))))
    }
}

/// Event stream over a chunked NDJSON body
pub struct NdjsonStream<S> {
    chunks: S,
    lines: LineBuffer,
    queue: VecDeque<Vec<u8>>,
    eof: bool,
    finished: bool,
}

impl<S> NdjsonStream<S> {
    /// Wrap a stream of body chunks
    pub fn new(chunks: S) -> Self {
        Self {
            chunks,
            lines: LineBuffer::default(),
            queue: VecDeque::new(),
            eof: false,
            finished: false,
        }
    }
}

#[async_trait]
impl<S, B, E> EventStream for NdjsonStream<S>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
    E: Into<Error> + Send,
{
    async fn next_event(&mut self) -> Option<Result<TokenEvent>> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(line) = self.queue.pop_front() {
                if line.trim_ascii().is_empty() {
                    continue;
                }

                let decoded = decode_line(&line);
                self.finished = !matches!(decoded, Ok(TokenEvent { done: false, .. }));
                return Some(decoded);
            }

            if self.eof {
                self.finished = true;
                tracing::warn!("generation stream closed without completion record");
                return Some(Err(Error::TruncatedStream));
            }

            match self.chunks.next().await {
                Some(Ok(chunk)) => {
                    let lines = self.lines.push(chunk.as_ref());
                    self.queue.extend(lines);
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.eof = true;
                    self.queue.extend(self.lines.finish());
                }
            }
        }
    }
}

/// Reassembles lines split across network chunks
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed, without the newline
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Take an unterminated trailing line, if any
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Decode one NDJSON record
///
/// # Errors
///
/// Returns `Error::Decode` for lines that are not records and
/// `Error::Generation` for records reporting a service failure
pub fn decode_line(line: &[u8]) -> Result<TokenEvent> {
    let record: GenerateRecord = serde_json::from_slice(line).map_err(|e| {
        let text = String::from_utf8_lossy(line);
        let quoted: String = text.chars().take(MAX_QUOTED_LINE).collect();
        tracing::error!(error = %e, line = %quoted, "undecodable generation record");
        Error::Decode(format!("{e}: {quoted}"))
    })?;

    if let Some(message) = record.error {
        return Err(Error::Generation(message));
    }

    Ok(TokenEvent {
        text: record.response.unwrap_or_default(),
        done: record.done,
    })
}
