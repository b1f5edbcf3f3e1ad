//! Per-channel pub/sub used to carry agent output across the process
//! boundary between a queue worker and the HTTP/SSE handler holding the
//! client socket.
//!
//! Distinct from [`crate::event_bus`]: the event bus is internal
//! coordination (job lifecycle, pool health); `StreamRelay` is the
//! client-facing token stream for one `channel_id`.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One envelope on a channel's stream. Subscribers iterate until `Done` or
/// `Error` arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEnvelope {
    Content {
        delta: String,
    },
    ToolCallDelta {
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments_fragment: Option<String>,
    },
    ApprovalRequired {
        tool_call_id: String,
        function_ref: String,
        arguments: serde_json::Value,
    },
    ToolRejected {
        tool_call_id: String,
    },
    Done,
    Error {
        error: String,
    },
}

/// Default per-channel broadcast buffer; overridden by
/// `GatewayConfig::relay_channel_buffer`.
const DEFAULT_BUFFER: usize = 256;

/// Keyed pub/sub of [`RelayEnvelope`] streams, one per `channel_id`.
///
/// Backed by `tokio::sync::broadcast`: `publish` never blocks the caller,
/// and a subscriber that falls behind the bounded ring buffer observes
/// `RecvError::Lagged` rather than stalling the publisher. [`subscribe`]
/// turns a lag into a single `Error` envelope so callers never have to
/// handle the broadcast error type directly.
pub struct StreamRelay {
    buffer: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<RelayEnvelope>>>,
}

impl StreamRelay {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel_id: &str) -> broadcast::Sender<RelayEnvelope> {
        let mut channels = self.channels.lock().expect("relay channel map poisoned");
        channels
            .entry(channel_id.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .clone()
    }

    /// Publish one envelope. Silently succeeds if there are no subscribers
    /// yet (a worker may finish before the SSE client connects).
    pub fn publish(&self, channel_id: &str, envelope: RelayEnvelope) {
        let _ = self.sender(channel_id).send(envelope);
    }

    pub fn publish_chunk(&self, channel_id: &str, delta: impl Into<String>) {
        self.publish(channel_id, RelayEnvelope::Content { delta: delta.into() });
    }

    pub fn publish_done(&self, channel_id: &str) {
        self.publish(channel_id, RelayEnvelope::Done);
        self.channels.lock().expect("relay channel map poisoned").remove(channel_id);
    }

    pub fn publish_error(&self, channel_id: &str, error: impl Into<String>) {
        self.publish(channel_id, RelayEnvelope::Error { error: error.into() });
        self.channels.lock().expect("relay channel map poisoned").remove(channel_id);
    }

    /// Subscribe to a channel's stream, creating it if it doesn't exist yet.
    pub fn subscribe(&self, channel_id: &str) -> broadcast::Receiver<RelayEnvelope> {
        self.sender(channel_id).subscribe()
    }

    /// Receive the next envelope, translating a ring-buffer overflow into a
    /// terminal `Error` envelope instead of propagating `RecvError`.
    pub async fn recv_next(rx: &mut broadcast::Receiver<RelayEnvelope>) -> Option<RelayEnvelope> {
        match rx.recv().await {
            Ok(envelope) => Some(envelope),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(RelayEnvelope::Error {
                error: format!("stream overflowed, dropped {n} message(s)"),
            }),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

impl Default for StreamRelay {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_chunks() {
        let relay = StreamRelay::new(16);
        let mut rx = relay.subscribe("chat-1");
        relay.publish_chunk("chat-1", "hello");
        relay.publish_done("chat-1");

        assert_eq!(
            StreamRelay::recv_next(&mut rx).await,
            Some(RelayEnvelope::Content { delta: "hello".into() })
        );
        assert_eq!(StreamRelay::recv_next(&mut rx).await, Some(RelayEnvelope::Done));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let relay = StreamRelay::new(16);
        relay.publish_chunk("nobody-listening", "x");
    }

    #[tokio::test]
    async fn lag_surfaces_as_error_envelope() {
        let relay = StreamRelay::new(2);
        let mut rx = relay.subscribe("chat-1");
        for i in 0..10 {
            relay.publish_chunk("chat-1", format!("chunk-{i}"));
        }
        let next = StreamRelay::recv_next(&mut rx).await;
        assert!(matches!(next, Some(RelayEnvelope::Error { .. })));
    }

    #[tokio::test]
    async fn done_removes_channel_entry() {
        let relay = StreamRelay::new(16);
        let _rx = relay.subscribe("chat-1");
        relay.publish_done("chat-1");
        assert!(!relay.channels.lock().unwrap().contains_key("chat-1"));
    }
}
