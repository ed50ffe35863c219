//! Minimal `text/event-stream` reader for tests.

use super::constants::SSE_EVENT_TIMEOUT_MS;
use futures::{Stream, StreamExt};
use reqwest::Response;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).expect("SSE data is not JSON")
    }
}

pub struct SseReader {
    chunks: Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>,
    buffer: String,
}

impl SseReader {
    pub fn new(response: Response) -> Self {
        Self {
            chunks: Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec()))),
            buffer: String::new(),
        }
    }

    /// Next event, skipping keep-alive comments. `None` when the stream ends
    /// or nothing arrives in time.
    pub async fn next_event(&mut self) -> Option<SseEvent> {
        let wait = Duration::from_millis(SSE_EVENT_TIMEOUT_MS);
        tokio::time::timeout(wait, self.read_event()).await.ok().flatten()
    }

    async fn read_event(&mut self) -> Option<SseEvent> {
        loop {
            while let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                if let Some(event) = parse_block(&block) {
                    return Some(event);
                }
            }
            match self.chunks.next().await {
                Some(Ok(bytes)) => self
                    .buffer
                    .push_str(&String::from_utf8_lossy(&bytes).replace("\r\n", "\n")),
                _ => return None,
            }
        }
    }

    /// Reads events until one named `name` arrives.
    pub async fn next_named(&mut self, name: &str) -> Option<SseEvent> {
        while let Some(event) = self.next_event().await {
            if event.event == name {
                return Some(event);
            }
        }
        None
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim_start().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}
