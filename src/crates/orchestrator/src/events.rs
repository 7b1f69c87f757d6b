//! Event publishers for `workflow.log` payloads.
//!
//! The production deployment hands events to an external queue; in-process
//! consumers and tests use the channel publisher. Publishing never fails
//! the caller.

use async_trait::async_trait;
use flowgraph_core::services::EventPublisher;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Publishes events onto an unbounded channel for an in-process consumer.
pub struct ChannelEventPublisher {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelEventPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelEventPublisher {
    async fn publish(&self, event: Value) {
        if self.tx.send(event).is_err() {
            warn!("event consumer went away, dropping workflow.log event");
        }
    }
}

/// Logs events through tracing; a stand-in when no queue is wired.
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: Value) {
        let event_type = event
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        debug!(event_type, "event emitted");
    }
}
