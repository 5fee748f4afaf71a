//! Paced SSE-style delivery of a finished generation.
//!
//! The reply is already complete when emission starts; the emitter slices it
//! into fixed-size fragments and releases them on a timer so clients render
//! it like token streaming.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde_json::json;

use crate::agent::r#loop::{floor_char_boundary, GenerationResult};

const RESULT_PREVIEW_BYTES: usize = 100;

/// One wire event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Delta(String),
    /// Terminal sentinel. Nothing follows it.
    Done,
}

impl StreamChunk {
    /// Render as a single `data: ...\n\n` server-sent event.
    pub fn to_sse(&self) -> String {
        match self {
            StreamChunk::Delta(content) => format!(
                "data: {}\n\n",
                json!({ "choices": [{ "delta": { "content": content } }] })
            ),
            StreamChunk::Done => "data: [DONE]\n\n".to_string(),
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

#[derive(Debug, Clone)]
pub struct StreamEmitter {
    chunk_size: usize,
    delay: Duration,
}

impl Default for StreamEmitter {
    fn default() -> Self {
        Self::new(50, Duration::from_millis(50))
    }
}

impl StreamEmitter {
    pub fn new(chunk_size: usize, delay: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            delay,
        }
    }

    /// The exact event sequence `emit` will deliver for `result`.
    pub fn plan(&self, result: &GenerationResult) -> Vec<StreamChunk> {
        let chars: Vec<char> = result.text.chars().collect();
        let mut chunks: Vec<StreamChunk> = chars
            .chunks(self.chunk_size)
            .map(|c| StreamChunk::Delta(c.iter().collect()))
            .collect();

        if let Some(summary) = tool_summary(result) {
            chunks.push(StreamChunk::Delta(summary));
        }
        chunks.push(StreamChunk::Delta(String::new()));
        chunks.push(StreamChunk::Done);
        chunks
    }

    /// Deliver the plan one event per tick. Dropping the stream cancels the
    /// pending timer.
    pub fn emit(&self, result: &GenerationResult) -> ChunkStream {
        self.paced(self.plan(result), |_| {})
    }

    /// Release `events` one per tick, calling `on_release` as each one leaves
    /// the timer. Nothing runs once the stream is dropped.
    fn paced<F>(&self, events: Vec<StreamChunk>, on_release: F) -> ChunkStream
    where
        F: Fn(&StreamChunk) + Send + Sync + 'static,
    {
        let delay = self.delay;
        let on_release = Arc::new(on_release);
        Box::pin(
            stream::iter(events.into_iter().enumerate()).then(move |(i, chunk)| {
                let on_release = on_release.clone();
                async move {
                    if i > 0 && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    (*on_release)(&chunk);
                    chunk
                }
            }),
        )
    }
}

/// Map a chunk stream to its wire lines.
pub fn into_sse(chunks: ChunkStream) -> impl Stream<Item = String> + Send {
    chunks.map(|c| c.to_sse())
}

/// Single-line preview of a tool result, cut on a char boundary.
fn result_preview(result: &str) -> String {
    let flat = result.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() > RESULT_PREVIEW_BYTES {
        let end = floor_char_boundary(&flat, RESULT_PREVIEW_BYTES);
        format!("{}...", &flat[..end])
    } else {
        flat
    }
}

/// One block listing executed tool calls. Calls without a result are left out.
fn tool_summary(result: &GenerationResult) -> Option<String> {
    let lines: Vec<String> = result
        .steps
        .iter()
        .flat_map(|step| step.tool_calls.iter())
        .filter(|call| !call.name.is_empty())
        .filter_map(|call| {
            let output = call.result.as_deref()?;
            Some(format!("- {}: {}", call.name, result_preview(output)))
        })
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!("\n\n**Tools used:**\n{}", lines.join("\n")))
}
