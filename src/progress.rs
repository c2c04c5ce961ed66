//! Per-client progress/streaming transport.
//!
//! Each connected client gets one bounded outgoing queue identified by
//! `client_id`. Ingest progress and simulated answer-token streaming both
//! flow through the same queue; a client reconnecting under the same id
//! replaces the previous registration.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    Ping,
    StreamAnswer {
        question: String,
        #[serde(default)]
        context_chunks: Vec<String>,
        #[serde(default)]
        conversation_context: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingEvent {
    Pong,
    DocumentProgress {
        document_id: String,
        stage: Stage,
        progress: u8,
        details: String,
        timestamp: chrono::DateTime<Utc>,
    },
    AnswerStreamStart,
    AnswerStreamChunk {
        content: String,
        is_complete: bool,
    },
    AnswerStreamEnd {
        content: String,
        is_complete: bool,
        llm_used: String,
        timestamp: chrono::DateTime<Utc>,
    },
    AnswerStreamError {
        error: String,
    },
}

impl OutgoingEvent {
    fn is_progress(&self) -> bool {
        matches!(self, OutgoingEvent::DocumentProgress { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Complete,
    Error,
}

struct ClientQueue {
    buffer: Mutex<VecDeque<OutgoingEvent>>,
    notify: Notify,
    capacity: usize,
}

impl ClientQueue {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
        }
    }

    async fn push(&self, event: OutgoingEvent) {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= self.capacity {
            if event.is_progress() {
                if let Some(pos) = buffer.iter().position(|e| e.is_progress()) {
                    buffer.remove(pos);
                } else {
                    buffer.pop_front();
                }
            }
            // stream-answer frames are never dropped; the queue is allowed
            // to temporarily exceed capacity rather than lose one.
        }
        buffer.push_back(event);
        drop(buffer);
        self.notify.notify_waiters();
    }

    async fn drain(&self) -> Vec<OutgoingEvent> {
        let mut buffer = self.buffer.lock().await;
        buffer.drain(..).collect()
    }
}

/// Registry of connected clients and their bounded outgoing queues.
pub struct ProgressHub {
    clients: Mutex<HashMap<String, Arc<ClientQueue>>>,
    queue_depth: usize,
    stream_interval: Duration,
}

impl ProgressHub {
    pub fn new(queue_depth: usize, stream_interval_ms: u64) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            queue_depth,
            stream_interval: Duration::from_millis(stream_interval_ms),
        }
    }

    /// Register (or re-register) a client, returning the queue to push events to.
    pub async fn register(&self, client_id: &str) -> Arc<ClientQueue> {
        let queue = Arc::new(ClientQueue::new(self.queue_depth));
        let mut clients = self.clients.lock().await;
        if clients.insert(client_id.to_string(), queue.clone()).is_some() {
            debug!("client {client_id} re-registered, prior transport replaced");
        } else {
            info!("client {client_id} registered");
        }
        queue
    }

    pub async fn deregister(&self, client_id: &str) {
        self.clients.lock().await.remove(client_id);
        debug!("client {client_id} deregistered");
    }

    pub async fn send(&self, client_id: &str, event: OutgoingEvent) {
        let queue = self.clients.lock().await.get(client_id).cloned();
        match queue {
            Some(queue) => queue.push(event).await,
            None => warn!("no registered client for id {client_id}, dropping event"),
        }
    }

    /// Drain whatever is pending for `client_id` without blocking.
    pub async fn drain(&self, client_id: &str) -> Vec<OutgoingEvent> {
        match self.clients.lock().await.get(client_id).cloned() {
            Some(queue) => queue.drain().await,
            None => Vec::new(),
        }
    }

    pub fn handle_incoming(&self, message: &IncomingMessage) -> Option<OutgoingEvent> {
        match message {
            IncomingMessage::Ping => Some(OutgoingEvent::Pong),
            IncomingMessage::StreamAnswer { .. } => None,
        }
    }

    /// Emit a document-progress event for a given stage.
    pub async fn report_progress(&self, client_id: &str, document_id: &str, stage: Stage, progress: u8, details: &str) {
        self.send(
            client_id,
            OutgoingEvent::DocumentProgress {
                document_id: document_id.to_string(),
                stage,
                progress,
                details: details.to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;
    }

    /// Simulate token streaming by splitting the final answer on whitespace
    /// and emitting one cumulative frame roughly every `stream_interval`.
    pub async fn stream_answer(&self, client_id: &str, answer: &str, llm_used: &str) {
        self.send(client_id, OutgoingEvent::AnswerStreamStart).await;

        let words: Vec<&str> = answer.split_whitespace().collect();
        let mut cumulative = String::new();
        for (i, word) in words.iter().enumerate() {
            if i > 0 {
                cumulative.push(' ');
            }
            cumulative.push_str(word);
            self.send(
                client_id,
                OutgoingEvent::AnswerStreamChunk {
                    content: cumulative.clone(),
                    is_complete: false,
                },
            )
            .await;
            tokio::time::sleep(self.stream_interval).await;
        }

        self.send(
            client_id,
            OutgoingEvent::AnswerStreamEnd {
                content: answer.to_string(),
                is_complete: true,
                llm_used: llm_used.to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drops_oldest_progress_event_under_pressure() {
        let hub = ProgressHub::new(2, 1);
        hub.register("c1").await;

        for i in 0..5 {
            hub.report_progress("c1", "doc-1", Stage::Embedding, i * 10, "batch").await;
        }

        let drained = hub.drain("c1").await;
        assert!(drained.len() <= 2);
    }

    #[tokio::test]
    async fn test_stream_answer_frames_never_dropped() {
        let hub = ProgressHub::new(1, 1);
        hub.register("c1").await;
        hub.stream_answer("c1", "one two three four five", "openai").await;

        let drained = hub.drain("c1").await;
        // start + 5 chunk frames + end, none dropped despite depth=1
        assert_eq!(drained.len(), 7);
    }

    #[tokio::test]
    async fn test_reregister_replaces_prior_transport() {
        let hub = ProgressHub::new(4, 1);
        let first = hub.register("c1").await;
        first.push(OutgoingEvent::Pong).await;
        let second = hub.register("c1").await;
        assert!(second.drain().await.is_empty());
    }

    #[test]
    fn test_ping_maps_to_pong() {
        let hub = ProgressHub::new(4, 1);
        let reply = hub.handle_incoming(&IncomingMessage::Ping);
        assert!(matches!(reply, Some(OutgoingEvent::Pong)));
    }
}
