//! Streaming frames from the executor to the caller.
//!
//! A run streams text chunks as LLM tokens arrive, then exactly one terminal
//! frame: `Done` on success, `Error` on failure. Senders never block the
//! run; a slow or disconnected consumer drops frames.

use tokio::sync::mpsc;

/// One frame on the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Incremental response text
    Chunk { text: String },
    /// Terminal error frame
    Error { code: String, message: String },
    /// Terminal success frame
    Done { run_id: String, status: String },
}

/// Sending half of a response stream.
#[derive(Clone)]
pub struct StreamSink {
    tx: mpsc::Sender<StreamFrame>,
}

impl StreamSink {
    /// Create a sink and its receiving half.
    pub fn channel(buffer: usize) -> (StreamSink, mpsc::Receiver<StreamFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (StreamSink { tx }, rx)
    }

    /// Emit a text chunk. Dropped if the consumer went away.
    pub async fn emit_chunk(&self, text: impl Into<String>) {
        let _ = self.tx.send(StreamFrame::Chunk { text: text.into() }).await;
    }

    /// Emit the terminal error frame.
    pub async fn emit_error(&self, code: impl Into<String>, message: impl Into<String>) {
        let _ = self
            .tx
            .send(StreamFrame::Error {
                code: code.into(),
                message: message.into(),
            })
            .await;
    }

    /// Emit the terminal success frame.
    pub async fn emit_done(&self, run_id: impl Into<String>, status: impl Into<String>) {
        let _ = self
            .tx
            .send(StreamFrame::Done {
                run_id: run_id.into(),
                status: status.into(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (sink, mut rx) = StreamSink::channel(8);
        sink.emit_chunk("hel").await;
        sink.emit_chunk("lo").await;
        sink.emit_done("run-1", "completed").await;
        drop(sink);

        assert_eq!(rx.recv().await, Some(StreamFrame::Chunk { text: "hel".into() }));
        assert_eq!(rx.recv().await, Some(StreamFrame::Chunk { text: "lo".into() }));
        assert_eq!(
            rx.recv().await,
            Some(StreamFrame::Done { run_id: "run-1".into(), status: "completed".into() })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_block() {
        let (sink, rx) = StreamSink::channel(1);
        drop(rx);
        sink.emit_chunk("lost").await;
        sink.emit_error("cancelled", "gone").await;
    }
}
